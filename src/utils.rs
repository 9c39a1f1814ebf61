//! Identifier minting

use bech32::Bech32m;
use uuid7::uuid7;

use crate::error::LifecycleError;

pub const USER_HRP: &str = "user_";
pub const CARGO_HRP: &str = "cargo_";
pub const FLIGHT_HRP: &str = "flight_";
pub const LOCATION_HRP: &str = "loc_";
pub const CARGO_TYPE_HRP: &str = "ctype_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub(crate) fn mint_id(hrp: &str) -> Result<String, LifecycleError> {
    new_uuid_to_bech32(hrp).map_err(|e| LifecycleError::Identifier(e.to_string()))
}
