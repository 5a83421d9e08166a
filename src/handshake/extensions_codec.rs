//! Extension payload builders and parsers (RFC 8446 §4.2).
//!
//! Hello extension lists are assembled through the two `build_*_extensions`
//! functions so that the canonical encoding is byte-identical wherever a
//! hello is (re)constructed — the compact record layer rebuilds hellos from
//! its context through the same functions.

use crate::crypt::{NamedGroup, PskKeyExchangeMode, SignatureScheme};
use crate::error::Error;
use crate::extensions::{Extension, ExtensionType};
use crate::TLS13_VERSION;

// ---------------------------------------------------------------------------
// supported_versions
// ---------------------------------------------------------------------------

/// ClientHello form: version list with the single entry TLS 1.3.
pub fn build_supported_versions_ch() -> Extension {
    Extension {
        extension_type: ExtensionType::SUPPORTED_VERSIONS,
        data: vec![0x02, 0x03, 0x04],
    }
}

/// ServerHello form: the single selected version.
pub fn build_supported_versions_sh() -> Extension {
    Extension {
        extension_type: ExtensionType::SUPPORTED_VERSIONS,
        data: TLS13_VERSION.to_be_bytes().to_vec(),
    }
}

/// Parse the ClientHello supported_versions list.
pub fn parse_supported_versions_ch(data: &[u8]) -> Result<Vec<u16>, Error> {
    if data.is_empty() || data[0] as usize != data.len() - 1 || data[0] % 2 != 0 {
        return Err(Error::Decode("bad supported_versions list".into()));
    }
    Ok(data[1..]
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

/// Parse the ServerHello selected version.
pub fn parse_supported_versions_sh(data: &[u8]) -> Result<u16, Error> {
    if data.len() != 2 {
        return Err(Error::Decode("bad supported_versions selection".into()));
    }
    Ok(u16::from_be_bytes([data[0], data[1]]))
}

// ---------------------------------------------------------------------------
// server_name
// ---------------------------------------------------------------------------

/// SNI extension with a single host_name entry.
pub fn build_server_name(name: &str) -> Extension {
    let name_bytes = name.as_bytes();
    let mut data = Vec::with_capacity(5 + name_bytes.len());
    data.extend_from_slice(&((name_bytes.len() + 3) as u16).to_be_bytes());
    data.push(0); // name_type = host_name
    data.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
    data.extend_from_slice(name_bytes);
    Extension {
        extension_type: ExtensionType::SERVER_NAME,
        data,
    }
}

/// Parse an SNI extension; returns the host_name.
pub fn parse_server_name(data: &[u8]) -> Result<String, Error> {
    let err = || Error::Decode("bad server_name extension".into());
    if data.len() < 5 {
        return Err(err());
    }
    let list_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if list_len != data.len() - 2 || data[2] != 0 {
        return Err(err());
    }
    let name_len = u16::from_be_bytes([data[3], data[4]]) as usize;
    if name_len != data.len() - 5 {
        return Err(err());
    }
    String::from_utf8(data[5..].to_vec()).map_err(|_| err())
}

// ---------------------------------------------------------------------------
// supported_groups / signature_algorithms
// ---------------------------------------------------------------------------

/// supported_groups extension.
pub fn build_supported_groups(groups: &[NamedGroup]) -> Extension {
    let mut data = Vec::with_capacity(2 + groups.len() * 2);
    data.extend_from_slice(&((groups.len() * 2) as u16).to_be_bytes());
    for g in groups {
        data.extend_from_slice(&g.0.to_be_bytes());
    }
    Extension {
        extension_type: ExtensionType::SUPPORTED_GROUPS,
        data,
    }
}

/// Parse a supported_groups extension.
pub fn parse_supported_groups(data: &[u8]) -> Result<Vec<NamedGroup>, Error> {
    let body = u16_vector(data, "supported_groups")?;
    Ok(body
        .chunks_exact(2)
        .map(|c| NamedGroup(u16::from_be_bytes([c[0], c[1]])))
        .collect())
}

/// signature_algorithms extension.
pub fn build_signature_algorithms(schemes: &[SignatureScheme]) -> Extension {
    let mut data = Vec::with_capacity(2 + schemes.len() * 2);
    data.extend_from_slice(&((schemes.len() * 2) as u16).to_be_bytes());
    for s in schemes {
        data.extend_from_slice(&s.0.to_be_bytes());
    }
    Extension {
        extension_type: ExtensionType::SIGNATURE_ALGORITHMS,
        data,
    }
}

/// Parse a signature_algorithms extension.
pub fn parse_signature_algorithms(data: &[u8]) -> Result<Vec<SignatureScheme>, Error> {
    let body = u16_vector(data, "signature_algorithms")?;
    Ok(body
        .chunks_exact(2)
        .map(|c| SignatureScheme(u16::from_be_bytes([c[0], c[1]])))
        .collect())
}

fn u16_vector<'a>(data: &'a [u8], what: &str) -> Result<&'a [u8], Error> {
    if data.len() < 2 {
        return Err(Error::Decode(format!("bad {what} extension")));
    }
    let len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if len != data.len() - 2 || len % 2 != 0 || len == 0 {
        return Err(Error::Decode(format!("bad {what} extension")));
    }
    Ok(&data[2..])
}

// ---------------------------------------------------------------------------
// key_share
// ---------------------------------------------------------------------------

/// ClientHello key_share with a single entry.
pub fn build_key_share_ch(group: NamedGroup, public: &[u8]) -> Extension {
    let mut data = Vec::with_capacity(6 + public.len());
    data.extend_from_slice(&((4 + public.len()) as u16).to_be_bytes());
    data.extend_from_slice(&group.0.to_be_bytes());
    data.extend_from_slice(&(public.len() as u16).to_be_bytes());
    data.extend_from_slice(public);
    Extension {
        extension_type: ExtensionType::KEY_SHARE,
        data,
    }
}

/// Parse the ClientHello key_share entries.
pub fn parse_key_share_ch(data: &[u8]) -> Result<Vec<(NamedGroup, Vec<u8>)>, Error> {
    let err = || Error::Decode("bad key_share extension".into());
    if data.len() < 2 {
        return Err(err());
    }
    let list_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if list_len != data.len() - 2 {
        return Err(err());
    }
    let mut shares = Vec::new();
    let mut pos = 2;
    while pos < data.len() {
        if data.len() - pos < 4 {
            return Err(err());
        }
        let group = NamedGroup(u16::from_be_bytes([data[pos], data[pos + 1]]));
        let key_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 4;
        if data.len() - pos < key_len {
            return Err(err());
        }
        shares.push((group, data[pos..pos + key_len].to_vec()));
        pos += key_len;
    }
    Ok(shares)
}

/// ServerHello key_share: the single selected entry.
pub fn build_key_share_sh(group: NamedGroup, public: &[u8]) -> Extension {
    let mut data = Vec::with_capacity(4 + public.len());
    data.extend_from_slice(&group.0.to_be_bytes());
    data.extend_from_slice(&(public.len() as u16).to_be_bytes());
    data.extend_from_slice(public);
    Extension {
        extension_type: ExtensionType::KEY_SHARE,
        data,
    }
}

/// Parse the ServerHello key_share entry.
pub fn parse_key_share_sh(data: &[u8]) -> Result<(NamedGroup, Vec<u8>), Error> {
    let err = || Error::Decode("bad key_share extension".into());
    if data.len() < 4 {
        return Err(err());
    }
    let group = NamedGroup(u16::from_be_bytes([data[0], data[1]]));
    let key_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    if key_len != data.len() - 4 {
        return Err(err());
    }
    Ok((group, data[4..].to_vec()))
}

// ---------------------------------------------------------------------------
// psk_key_exchange_modes / pre_shared_key
// ---------------------------------------------------------------------------

/// psk_key_exchange_modes extension.
pub fn build_psk_modes(modes: &[PskKeyExchangeMode]) -> Extension {
    let mut data = Vec::with_capacity(1 + modes.len());
    data.push(modes.len() as u8);
    for m in modes {
        data.push(*m as u8);
    }
    Extension {
        extension_type: ExtensionType::PSK_KEY_EXCHANGE_MODES,
        data,
    }
}

/// Parse a psk_key_exchange_modes extension.
pub fn parse_psk_modes(data: &[u8]) -> Result<Vec<PskKeyExchangeMode>, Error> {
    if data.is_empty() || data[0] as usize != data.len() - 1 || data.len() == 1 {
        return Err(Error::Decode("bad psk_key_exchange_modes".into()));
    }
    data[1..]
        .iter()
        .map(|&v| {
            PskKeyExchangeMode::from_u8(v)
                .map_err(|v| Error::Decode(format!("unknown psk mode: {v}")))
        })
        .collect()
}

/// ClientHello pre_shared_key offer with a single identity + binder.
///
/// Must be the last extension in the list; the binder is computed over the
/// ClientHello truncated just before the binders list and patched in
/// afterwards.
pub fn build_pre_shared_key_ch(identity: &[u8], obfuscated_age: u32, binder: &[u8]) -> Extension {
    let mut data = Vec::with_capacity(9 + identity.len() + binder.len());
    // identities
    data.extend_from_slice(&((identity.len() + 6) as u16).to_be_bytes());
    data.extend_from_slice(&(identity.len() as u16).to_be_bytes());
    data.extend_from_slice(identity);
    data.extend_from_slice(&obfuscated_age.to_be_bytes());
    // binders
    data.extend_from_slice(&((binder.len() + 1) as u16).to_be_bytes());
    data.push(binder.len() as u8);
    data.extend_from_slice(binder);
    Extension {
        extension_type: ExtensionType::PRE_SHARED_KEY,
        data,
    }
}

/// Parse a ClientHello pre_shared_key offer.
///
/// Returns (identities with obfuscated ages, binders).
#[allow(clippy::type_complexity)]
pub fn parse_pre_shared_key_ch(data: &[u8]) -> Result<(Vec<(Vec<u8>, u32)>, Vec<Vec<u8>>), Error> {
    let err = || Error::Decode("bad pre_shared_key extension".into());
    if data.len() < 2 {
        return Err(err());
    }
    let id_list_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() < 2 + id_list_len {
        return Err(err());
    }
    let mut identities = Vec::new();
    let mut pos = 2;
    let id_end = 2 + id_list_len;
    while pos < id_end {
        if id_end - pos < 2 {
            return Err(err());
        }
        let id_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2;
        if id_end - pos < id_len + 4 {
            return Err(err());
        }
        let identity = data[pos..pos + id_len].to_vec();
        pos += id_len;
        let age = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
        pos += 4;
        identities.push((identity, age));
    }

    if data.len() - pos < 2 {
        return Err(err());
    }
    let binder_list_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    pos += 2;
    if data.len() - pos != binder_list_len {
        return Err(err());
    }
    let mut binders = Vec::new();
    while pos < data.len() {
        let b_len = data[pos] as usize;
        pos += 1;
        if data.len() - pos < b_len {
            return Err(err());
        }
        binders.push(data[pos..pos + b_len].to_vec());
        pos += b_len;
    }

    if identities.is_empty() || identities.len() != binders.len() {
        return Err(err());
    }
    Ok((identities, binders))
}

/// ServerHello pre_shared_key: the selected identity index.
pub fn build_pre_shared_key_sh(selected: u16) -> Extension {
    Extension {
        extension_type: ExtensionType::PRE_SHARED_KEY,
        data: selected.to_be_bytes().to_vec(),
    }
}

/// Parse the ServerHello pre_shared_key selection.
pub fn parse_pre_shared_key_sh(data: &[u8]) -> Result<u16, Error> {
    if data.len() != 2 {
        return Err(Error::Decode("bad pre_shared_key selection".into()));
    }
    Ok(u16::from_be_bytes([data[0], data[1]]))
}

// ---------------------------------------------------------------------------
// Canonical hello extension lists
// ---------------------------------------------------------------------------

/// A pre_shared_key offer for the canonical ClientHello builder.
pub struct PskOffer<'a> {
    pub identity: &'a [u8],
    pub obfuscated_age: u32,
    pub binder: &'a [u8],
}

/// The canonical ClientHello extension list.
///
/// Fixed order: supported_versions, server_name?, supported_groups,
/// signature_algorithms, key_share, psk_key_exchange_modes?,
/// pre_shared_key? (always last, per RFC 8446 §4.2.11).
pub fn build_client_hello_extensions(
    server_name: Option<&str>,
    groups: &[NamedGroup],
    schemes: &[SignatureScheme],
    key_share: (NamedGroup, &[u8]),
    psk_modes: &[PskKeyExchangeMode],
    psk_offer: Option<&PskOffer<'_>>,
) -> Vec<Extension> {
    let mut extensions = vec![build_supported_versions_ch()];
    if let Some(name) = server_name {
        extensions.push(build_server_name(name));
    }
    extensions.push(build_supported_groups(groups));
    extensions.push(build_signature_algorithms(schemes));
    extensions.push(build_key_share_ch(key_share.0, key_share.1));
    if psk_offer.is_some() {
        extensions.push(build_psk_modes(psk_modes));
    }
    if let Some(offer) = psk_offer {
        extensions.push(build_pre_shared_key_ch(
            offer.identity,
            offer.obfuscated_age,
            offer.binder,
        ));
    }
    extensions
}

/// The canonical ServerHello extension list.
///
/// Fixed order: supported_versions, key_share? (absent in psk_ke mode),
/// pre_shared_key?.
pub fn build_server_hello_extensions(
    key_share: Option<(NamedGroup, &[u8])>,
    selected_psk: Option<u16>,
) -> Vec<Extension> {
    let mut extensions = vec![build_supported_versions_sh()];
    if let Some((group, public)) = key_share {
        extensions.push(build_key_share_sh(group, public));
    }
    if let Some(selected) = selected_psk {
        extensions.push(build_pre_shared_key_sh(selected));
    }
    extensions
}

/// Find an extension by type.
pub fn find_extension<'a>(exts: &'a [Extension], ty: ExtensionType) -> Option<&'a Extension> {
    exts.iter().find(|e| e.extension_type == ty)
}
