//! Utility functions for identifiers and references

use super::error::ValidationError;
use super::types::TimeStamp;
use bech32::Bech32m;
use chrono::Utc;
use uuid7::uuid7;

// time-ordered 16 byte identifier
pub fn mint_id() -> [u8; 16] {
    *uuid7().as_bytes()
}

pub fn encode_bech32(hrp: &str, data: &[u8]) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, data)?;
    Ok(encode)
}

pub fn decode_bech32(expected_hrp: &str, encoded: &str) -> Result<[u8; 16], ValidationError> {
    let malformed = || ValidationError::MalformedId(encoded.to_string());

    let (hrp, data) = bech32::decode(encoded).map_err(|_| malformed())?;
    if hrp.as_str() != expected_hrp {
        return Err(malformed());
    }
    data.try_into().map_err(|_| malformed())
}

/// Human facing order code, e.g. `FO-20261019-3FA2C1D04E7B`. Assigned once at intake.
/// The suffix is the 48 low bits of the id.
pub fn order_reference(placed_at: &TimeStamp<Utc>, id: &[u8; 16]) -> String {
    format!(
        "FO-{}-{}",
        placed_at.to_datetime_utc().format("%Y%m%d"),
        hex::encode_upper(&id[10..])
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_carries_placement_date() {
        let placed_at = TimeStamp::new_with(2026, 3, 9, 8, 0, 0).unwrap();
        let reference = order_reference(&placed_at, &[0xab; 16]);

        assert_eq!(reference, "FO-20260309-ABABABABABAB");
    }

    #[test]
    fn references_differ_for_ids_minted_together() {
        let placed_at = TimeStamp::new();
        let references: std::collections::HashSet<String> = (0..10_000)
            .map(|_| order_reference(&placed_at, &mint_id()))
            .collect();

        assert_eq!(references.len(), 10_000);
    }

    #[test]
    fn empty_hrp_is_rejected() {
        assert!(encode_bech32("", &mint_id()).is_err());
    }
}
