//! RSCN payload.
//!
//! ```text
//! [0x61][page_len=4][payload_len:2 BE]
//! [qualifier:6 bits | format:2 bits][affected address:3 BE] * N
//! ```

use super::{ElsCommand, ProtocolError};
use crate::identity::Did;

/// Size of one RSCN page (and of the payload header).
pub const RSCN_PAGE_LEN: usize = 4;

/// Granularity of an affected-address page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressFormat {
    /// A single N_Port.
    Port,
    /// Every port in an area.
    Area,
    /// Every port in a domain.
    Domain,
    /// The whole fabric.
    Fabric,
}

impl AddressFormat {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => AddressFormat::Port,
            1 => AddressFormat::Area,
            2 => AddressFormat::Domain,
            _ => AddressFormat::Fabric,
        }
    }

    fn bits(&self) -> u8 {
        match self {
            AddressFormat::Port => 0,
            AddressFormat::Area => 1,
            AddressFormat::Domain => 2,
            AddressFormat::Fabric => 3,
        }
    }

    /// Mask of address bits compared for this granularity.
    pub fn mask(&self) -> u32 {
        match self {
            AddressFormat::Port => 0x00ff_ffff,
            AddressFormat::Area => 0x00ff_ff00,
            AddressFormat::Domain => 0x00ff_0000,
            AddressFormat::Fabric => 0,
        }
    }

    /// Higher is more specific.
    pub fn specificity(&self) -> u8 {
        match self {
            AddressFormat::Port => 3,
            AddressFormat::Area => 2,
            AddressFormat::Domain => 1,
            AddressFormat::Fabric => 0,
        }
    }
}

/// One affected-address page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RscnPage {
    pub format: AddressFormat,
    pub address: Did,
    /// Event qualifier (upper 6 bits of the first byte), carried through.
    pub qualifier: u8,
}

impl RscnPage {
    pub fn new(format: AddressFormat, address: Did) -> Self {
        Self {
            format,
            address,
            qualifier: 0,
        }
    }

    /// Whether `did` falls inside the affected range.
    pub fn matches(&self, did: Did) -> bool {
        let mask = self.format.mask();
        did.as_u32() & mask == self.address.as_u32() & mask
    }
}

/// A decoded RSCN.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RscnPayload {
    pub pages: Vec<RscnPage>,
}

impl RscnPayload {
    pub fn new(pages: Vec<RscnPage>) -> Self {
        Self { pages }
    }

    /// Decode from wire bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < RSCN_PAGE_LEN {
            return Err(ProtocolError::PayloadTooShort {
                expected: RSCN_PAGE_LEN,
                got: data.len(),
            });
        }
        if data[0] != ElsCommand::Rscn.code() {
            return Err(ProtocolError::InvalidCommand(data[0]));
        }
        if data[1] as usize != RSCN_PAGE_LEN {
            return Err(ProtocolError::InvalidPageLength(data[1]));
        }
        let declared = u16::from_be_bytes([data[2], data[3]]) as usize;
        if declared != data.len() {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }
        if (declared - RSCN_PAGE_LEN) % RSCN_PAGE_LEN != 0 {
            return Err(ProtocolError::Malformed(format!(
                "page area of {} bytes is not a multiple of {}",
                declared - RSCN_PAGE_LEN,
                RSCN_PAGE_LEN
            )));
        }

        let pages = data[RSCN_PAGE_LEN..]
            .chunks_exact(RSCN_PAGE_LEN)
            .map(|page| RscnPage {
                format: AddressFormat::from_bits(page[0]),
                qualifier: page[0] >> 2,
                address: Did::from_bytes([page[1], page[2], page[3]]),
            })
            .collect();

        Ok(Self { pages })
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let len = RSCN_PAGE_LEN * (self.pages.len() + 1);
        let mut buf = Vec::with_capacity(len);
        buf.push(ElsCommand::Rscn.code());
        buf.push(RSCN_PAGE_LEN as u8);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
        for page in &self.pages {
            buf.push(page.qualifier << 2 | page.format.bits());
            buf.extend_from_slice(&page.address.to_bytes());
        }
        buf
    }

    /// The most specific granularity among pages matching `did`.
    pub fn best_match(&self, did: Did) -> Option<AddressFormat> {
        self.pages
            .iter()
            .filter(|page| page.matches(did))
            .map(|page| page.format)
            .max_by_key(|format| format.specificity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_port_page() {
        let data = [0x61, 0x04, 0x00, 0x08, 0x00, 0x01, 0x02, 0x03];
        let payload = RscnPayload::parse(&data).unwrap();
        assert_eq!(payload.pages.len(), 1);
        assert_eq!(payload.pages[0].format, AddressFormat::Port);
        assert_eq!(payload.pages[0].address, Did::from_u24(0x010203));
    }

    #[test]
    fn test_parse_rejects_bad_header() {
        assert_eq!(
            RscnPayload::parse(&[0x61, 0x04]),
            Err(ProtocolError::PayloadTooShort { expected: 4, got: 2 })
        );
        assert_eq!(
            RscnPayload::parse(&[0x62, 0x04, 0x00, 0x04]),
            Err(ProtocolError::InvalidCommand(0x62))
        );
        assert_eq!(
            RscnPayload::parse(&[0x61, 0x08, 0x00, 0x04]),
            Err(ProtocolError::InvalidPageLength(0x08))
        );
        assert_eq!(
            RscnPayload::parse(&[0x61, 0x04, 0x00, 0x0c, 0, 1, 2, 3]),
            Err(ProtocolError::LengthMismatch { declared: 12, actual: 8 })
        );
    }

    #[test]
    fn test_encode_matches_parse() {
        let payload = RscnPayload::new(vec![
            RscnPage::new(AddressFormat::Area, Did::from_u24(0x0a0b00)),
            RscnPage {
                format: AddressFormat::Domain,
                address: Did::from_u24(0x0c0000),
                qualifier: 0x05,
            },
        ]);
        let bytes = payload.encode();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &[0x61, 0x04, 0x00, 0x0c]);
        assert_eq!(bytes[8], 0x05 << 2 | 0x02);
        assert_eq!(RscnPayload::parse(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_page_matching_granularity() {
        let did = Did::from_u24(0x010203);
        assert!(RscnPage::new(AddressFormat::Port, did).matches(did));
        assert!(!RscnPage::new(AddressFormat::Port, Did::from_u24(0x010204)).matches(did));
        assert!(RscnPage::new(AddressFormat::Area, Did::from_u24(0x0102ff)).matches(did));
        assert!(!RscnPage::new(AddressFormat::Area, Did::from_u24(0x0103ff)).matches(did));
        assert!(RscnPage::new(AddressFormat::Domain, Did::from_u24(0x01ffff)).matches(did));
        assert!(RscnPage::new(AddressFormat::Fabric, Did::from_u24(0)).matches(did));
    }

    #[test]
    fn test_best_match_prefers_most_specific() {
        let did = Did::from_u24(0x010203);
        let payload = RscnPayload::new(vec![
            RscnPage::new(AddressFormat::Domain, Did::from_u24(0x010000)),
            RscnPage::new(AddressFormat::Port, did),
            RscnPage::new(AddressFormat::Area, Did::from_u24(0x010200)),
        ]);
        assert_eq!(payload.best_match(did), Some(AddressFormat::Port));
        assert_eq!(
            payload.best_match(Did::from_u24(0x010299)),
            Some(AddressFormat::Area)
        );
        assert_eq!(payload.best_match(Did::from_u24(0x020000)), None);
    }
}
