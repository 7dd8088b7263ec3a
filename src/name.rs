//! NBP service names.
//!
//! The configured display name arrives in the local text encoding (UTF-8).
//! NBP entities are compared in Mac Roman, so the name is converted first and
//! only then split into its `Object:Type@Zone` parts. The resulting
//! [`ServiceName`] is immutable: the bytes used to register are the bytes used
//! to unregister.

use std::fmt;

use anyhow::{anyhow, bail, Result};

/// Longest object, type or zone an NBP tuple can carry.
pub const MAX_PART_LEN: usize = 32;

/// Longest full `Object:Type@Zone` string.
pub const MAX_NAME_LEN: usize = 3 * MAX_PART_LEN + 2;

/// Zone used when the name does not name one ("this zone").
pub const DEFAULT_ZONE: &[u8] = b"*";

/// Exact-match wildcard, valid in lookups but not in registrations.
const WILDCARD: &[u8] = b"=";

/// Mac Roman `≈`, the partial-match wildcard.
const PARTIAL_WILDCARD: u8 = 0xC5;

/// Convert a display name from UTF-8 to Mac Roman.
///
/// A name with any character that has no Mac Roman form is returned
/// unconverted, byte for byte.
pub fn encode_name(name: &str) -> Vec<u8> {
    let (encoded, _, had_unmappable) = encoding_rs::MACINTOSH.encode(name);
    if had_unmappable {
        log::debug!("NBP name {name:?} does not fit Mac Roman, registering it unconverted");
        return name.as_bytes().to_vec();
    }
    encoded.into_owned()
}

/// A parsed, Mac Roman encoded NBP entity name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ServiceName {
    object: Vec<u8>,
    kind: Vec<u8>,
    zone: Vec<u8>,
}

impl ServiceName {
    /// Encode `name` and split it into its three parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoded name does not follow the NBP naming
    /// grammar.
    pub fn resolve(name: &str) -> Result<Self> {
        Self::parse(&encode_name(name))
    }

    /// Split an already encoded name into object, type and zone.
    ///
    /// The zone is everything after the last `@` and the type everything after
    /// the last `:` before it. A missing or empty zone means `*`.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty name, a missing or empty object or type,
    /// a part longer than [`MAX_PART_LEN`], or a wildcard part.
    pub fn parse(encoded: &[u8]) -> Result<Self> {
        if encoded.is_empty() {
            bail!("NBP name is empty");
        }
        if encoded.contains(&0) {
            bail!("NBP name contains a NUL byte");
        }
        if encoded.len() > MAX_NAME_LEN {
            bail!(
                "NBP name is {} bytes long, max {MAX_NAME_LEN}",
                encoded.len()
            );
        }

        let (rest, zone) = match rsplit_once(encoded, b'@') {
            Some((rest, zone)) if !zone.is_empty() => (rest, zone),
            Some((rest, _)) => (rest, DEFAULT_ZONE),
            None => (encoded, DEFAULT_ZONE),
        };
        let (object, kind) = rsplit_once(rest, b':').ok_or_else(|| {
            anyhow!(
                "NBP name {:?} has no type, expected Object:Type@Zone",
                decode(encoded)
            )
        })?;

        check_part("object", object)?;
        check_part("type", kind)?;
        if zone.len() > MAX_PART_LEN {
            bail!("NBP zone is {} bytes long, max {MAX_PART_LEN}", zone.len());
        }

        Ok(Self {
            object: object.to_vec(),
            kind: kind.to_vec(),
            zone: zone.to_vec(),
        })
    }

    /// Object part, Mac Roman encoded.
    pub fn object(&self) -> &[u8] {
        &self.object
    }

    /// Type part, Mac Roman encoded.
    pub fn kind(&self) -> &[u8] {
        &self.kind
    }

    /// Zone part, Mac Roman encoded (`*` for the local zone).
    pub fn zone(&self) -> &[u8] {
        &self.zone
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            decode(&self.object),
            decode(&self.kind),
            decode(&self.zone)
        )
    }
}

impl fmt::Debug for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceName").field(&self.to_string()).finish()
    }
}

fn check_part(what: &str, part: &[u8]) -> Result<()> {
    if part.is_empty() {
        bail!("NBP {what} is empty");
    }
    if part.len() > MAX_PART_LEN {
        bail!("NBP {what} is {} bytes long, max {MAX_PART_LEN}", part.len());
    }
    if part == WILDCARD || part.contains(&PARTIAL_WILDCARD) {
        bail!("NBP {what} {:?} is a wildcard and cannot be registered", decode(part));
    }
    Ok(())
}

fn rsplit_once(bytes: &[u8], separator: u8) -> Option<(&[u8], &[u8])> {
    let at = bytes.iter().rposition(|&b| b == separator)?;
    Some((&bytes[..at], &bytes[at + 1..]))
}

/// Render Mac Roman bytes for logs.
fn decode(bytes: &[u8]) -> String {
    encoding_rs::MACINTOSH
        .decode_without_bom_handling(bytes)
        .0
        .into_owned()
}
