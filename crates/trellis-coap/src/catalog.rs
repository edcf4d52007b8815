//! Resource-catalog wire format (`.well-known/core` body)
//!
//! The catalog is an array of packed 26-byte records:
//!
//! ```text
//! record := path[24] (NUL-padded) functionType:u8 observable:u8
//! ```
//!
//! At most three records per node, so valid bodies are 26, 52, or 78 bytes.
//! The layout is deliberately explicit; nothing here relies on struct
//! representation.

use serde::{Deserialize, Serialize};

use trellis_common::{DeviceType, PEER_URIS_MAX, TrellisError, URI_PATH_MAX};

/// On-wire size of the path field (path bytes + at least one NUL).
pub const PATH_FIELD_LEN: usize = URI_PATH_MAX + 1;

/// On-wire size of one catalog record.
pub const RECORD_LEN: usize = PATH_FIELD_LEN + 2;

/// One entry of a node's resource catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriDescriptor {
    pub path: String,
    /// The function this resource performs, as a device-type tag.
    pub function: DeviceType,
    /// Whether the resource accepts observe subscriptions.
    pub observable: bool,
}

impl UriDescriptor {
    pub fn new(path: impl Into<String>, function: DeviceType, observable: bool) -> Self {
        UriDescriptor {
            path: path.into(),
            function,
            observable,
        }
    }

    fn validate(&self) -> Result<(), TrellisError> {
        if self.path.is_empty() || self.path.len() > URI_PATH_MAX {
            return Err(TrellisError::invalid_argument(format!(
                "uri path length {} outside 1..={URI_PATH_MAX}",
                self.path.len()
            )));
        }
        if self.path.as_bytes().contains(&0) {
            return Err(TrellisError::invalid_argument("uri path contains NUL"));
        }
        if self.function == DeviceType::None {
            return Err(TrellisError::invalid_argument("uri function type missing"));
        }
        Ok(())
    }
}

/// Serialize a catalog. Fails on an empty list, more than three entries, or
/// any invalid descriptor.
pub fn encode(descriptors: &[UriDescriptor]) -> Result<Vec<u8>, TrellisError> {
    if descriptors.is_empty() || descriptors.len() > PEER_URIS_MAX {
        return Err(TrellisError::invalid_argument(format!(
            "catalog holds {} entries, expected 1..={PEER_URIS_MAX}",
            descriptors.len()
        )));
    }

    let mut out = Vec::with_capacity(descriptors.len() * RECORD_LEN);
    for descriptor in descriptors {
        descriptor.validate()?;

        let mut path_field = [0u8; PATH_FIELD_LEN];
        path_field[..descriptor.path.len()].copy_from_slice(descriptor.path.as_bytes());
        out.extend_from_slice(&path_field);
        out.push(descriptor.function.tag());
        out.push(descriptor.observable as u8);
    }
    Ok(out)
}

/// Parse a catalog body received from a peer.
pub fn decode(body: &[u8]) -> Result<Vec<UriDescriptor>, TrellisError> {
    if body.is_empty() || body.len() % RECORD_LEN != 0 {
        return Err(TrellisError::invalid_argument(format!(
            "catalog body length {} is not a multiple of {RECORD_LEN}",
            body.len()
        )));
    }

    let count = body.len() / RECORD_LEN;
    if count > PEER_URIS_MAX {
        return Err(TrellisError::invalid_argument(format!(
            "catalog holds {count} records, expected at most {PEER_URIS_MAX}"
        )));
    }

    let mut descriptors = Vec::with_capacity(count);
    for record in body.chunks_exact(RECORD_LEN) {
        let path_field = &record[..PATH_FIELD_LEN];
        let nul = path_field
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| TrellisError::invalid_argument("catalog path not terminated"))?;
        if nul == 0 {
            return Err(TrellisError::invalid_argument("catalog path empty"));
        }

        let path = std::str::from_utf8(&path_field[..nul])
            .map_err(|_| TrellisError::invalid_argument("catalog path not utf-8"))?;

        let function = DeviceType::from_tag(record[PATH_FIELD_LEN])
            .filter(|&ty| ty != DeviceType::None)
            .ok_or_else(|| TrellisError::invalid_argument("catalog function tag unknown"))?;

        descriptors.push(UriDescriptor {
            path: path.to_owned(),
            function,
            observable: record[PATH_FIELD_LEN + 1] != 0,
        });
    }
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        assert_eq!(RECORD_LEN, 26);

        let body = encode(&[UriDescriptor::new(
            "light/on_off",
            DeviceType::LightingOnOff,
            true,
        )])
        .unwrap();

        assert_eq!(body.len(), 26);
        assert_eq!(&body[..12], b"light/on_off");
        assert!(body[12..24].iter().all(|&b| b == 0));
        assert_eq!(body[24], DeviceType::LightingOnOff.tag());
        assert_eq!(body[25], 1);
    }

    #[test]
    fn test_round_trip() {
        let catalog = vec![
            UriDescriptor::new("light/on_off", DeviceType::LightingOnOff, true),
            UriDescriptor::new("light/dimm", DeviceType::LightingDimm, true),
            UriDescriptor::new("light/info", DeviceType::Lighting, false),
        ];
        let body = encode(&catalog).unwrap();
        assert_eq!(body.len(), 78);
        assert_eq!(decode(&body).unwrap(), catalog);
    }

    #[test]
    fn test_encode_limits() {
        assert!(encode(&[]).is_err());

        let too_many: Vec<_> = (0..4)
            .map(|i| UriDescriptor::new(format!("uri/{i}"), DeviceType::Sensor, false))
            .collect();
        assert!(encode(&too_many).is_err());

        let long_path = UriDescriptor::new("x".repeat(URI_PATH_MAX + 1), DeviceType::Sensor, false);
        assert!(encode(&[long_path]).is_err());

        let max_path = UriDescriptor::new("x".repeat(URI_PATH_MAX), DeviceType::Sensor, false);
        let body = encode(&[max_path.clone()]).unwrap();
        assert_eq!(decode(&body).unwrap(), vec![max_path]);

        let no_function = UriDescriptor::new("uri", DeviceType::None, false);
        assert!(encode(&[no_function]).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0u8; 25]).is_err());
        // path field with no terminator
        assert!(decode(&[0x41u8; 26]).is_err());

        // unknown function tag
        let mut body = encode(&[UriDescriptor::new("x", DeviceType::Sensor, false)]).unwrap();
        body[24] = 200;
        assert!(decode(&body).is_err());
    }
}
