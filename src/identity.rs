//! Caller identity
//!
//! Who is invoking an operation: an id, an organization (MSP) and the
//! attributes certified for them. Certificate parsing belongs to the
//! platform; the contract only consumes this trait.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ChaincodeError, Result};

pub const ATTR_SENSOR: &str = "energy.sensor";
pub const ATTR_ADMIN: &str = "energy.admin";
pub const ATTR_SELLER: &str = "energy.seller";
pub const ATTR_PAYMENT_COMPANY: &str = "energy.paymentcompany";
pub const ATTR_UTILITY: &str = "energy.utility";
pub const ATTR_ORG_UNIT: &str = "ou";
pub const ATTR_X: &str = "energy.x";
pub const ATTR_Y: &str = "energy.y";
pub const ATTR_Z: &str = "energy.z";
pub const ATTR_RADIUS: &str = "energy.radius";

/// Organizational unit carried by anonymous buyer credentials.
pub const ANONYMOUS_BUYER_OU: &str = "idemixorg";

pub trait Identity {
    fn caller_id(&self) -> &str;

    fn caller_msp(&self) -> &str;

    fn attribute(&self, name: &str) -> Option<&str>;

    fn assert_attribute(&self, name: &str, expected: &str) -> Result<()> {
        match self.attribute(name) {
            Some(value) if value == expected => Ok(()),
            actual => Err(ChaincodeError::UnauthorizedCaller {
                attribute: name.to_string(),
                expected: expected.to_string(),
                actual: actual.map(str::to_string),
            }),
        }
    }

    /// Shorthand for boolean role attributes.
    fn require_role(&self, name: &str) -> Result<()> {
        self.assert_attribute(name, "true")
    }
}

/// Caller position from the position attributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

/// Parse an integer coordinate attribute.
pub fn coordinate(identity: &dyn Identity, name: &str) -> Result<i64> {
    let raw = identity
        .attribute(name)
        .ok_or_else(|| ChaincodeError::InvalidArgument(format!("missing attribute {}", name)))?;
    raw.trim().parse::<i64>().map_err(|e| {
        ChaincodeError::InvalidArgument(format!("attribute {}={:?} is not an integer: {}", name, raw, e))
    })
}

/// Caller position from `energy.x/y/z`.
pub fn position(identity: &dyn Identity) -> Result<Position> {
    Ok(Position {
        x: coordinate(identity, ATTR_X)?,
        y: coordinate(identity, ATTR_Y)?,
        z: coordinate(identity, ATTR_Z)?,
    })
}

/// Concrete identity, loadable from TOML for the CLI and used in tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub id: String,
    pub msp: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl CallerIdentity {
    pub fn new(msp: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msp: msp.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_role(self, name: &str) -> Self {
        self.with_attribute(name, "true")
    }

    pub fn at(self, x: i64, y: i64, z: i64) -> Self {
        self.with_attribute(ATTR_X, x.to_string())
            .with_attribute(ATTR_Y, y.to_string())
            .with_attribute(ATTR_Z, z.to_string())
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

impl Identity for CallerIdentity {
    fn caller_id(&self) -> &str {
        &self.id
    }

    fn caller_msp(&self) -> &str {
        &self.msp
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}
