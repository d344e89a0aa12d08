//! Validator trait, the structural validator and validator chains.

use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

use crate::codec::{self, peek_length, peek_type, Record};

/// Checks records crossing a link.
///
/// Implementations must not panic; a rejection is reported through the
/// returned reason only.
pub trait Validator: Send + Sync + Debug {
    /// Name used in failure reports.
    fn name(&self) -> &str;

    /// Checks one decoded record against its encoded bytes.
    ///
    /// Returns the reason on rejection.
    fn check(&self, record: &Record, raw: &[u8]) -> Result<(), String>;

    /// Returns true if the record is accepted.
    fn validate(&self, record: &Record, raw: &[u8]) -> bool {
        match self.check(record, raw) {
            Ok(()) => true,
            Err(reason) => {
                debug!(validator = self.name(), %reason, "Record rejected");
                false
            }
        }
    }
}

/// Validates an in-memory record by encoding it first.
///
/// Records that cannot be encoded are rejected.
pub fn validate_record(validator: &dyn Validator, record: &Record) -> bool {
    codec::encode(record).map_or(false, |raw| validator.validate(record, &raw))
}

/// Checks envelope, type and length consistency the way a production
/// decoder would.
#[derive(Debug, Clone, Default)]
pub struct StructuralValidator;

impl StructuralValidator {
    /// Creates a structural validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for StructuralValidator {
    fn name(&self) -> &str {
        "structural"
    }

    fn check(&self, record: &Record, raw: &[u8]) -> Result<(), String> {
        let declared = peek_length(raw)
            .ok_or_else(|| format!("{}-byte buffer has no length field", raw.len()))?;
        if i64::from(declared) != raw.len() as i64 {
            return Err(format!(
                "length field {declared} disagrees with {} bytes",
                raw.len()
            ));
        }
        if !record.is_stop_marker() && peek_type(raw) != record.record_type() {
            return Err(format!(
                "type field {:?} disagrees with decoded {:?}",
                peek_type(raw),
                record.record_type()
            ));
        }
        let reencoded = codec::encode(record).map_err(|e| e.to_string())?;
        if reencoded.as_ref() != raw {
            return Err("re-encoding does not reproduce the original bytes".to_string());
        }
        Ok(())
    }
}

/// Runs several validators; all must accept.
#[derive(Debug, Clone, Default)]
pub struct ValidatorChain {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidatorChain {
    /// Creates an empty chain, which accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a validator.
    #[must_use]
    pub fn with(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Appends a shared validator.
    #[must_use]
    pub fn with_shared(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Number of validators in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Returns true if the chain has no validators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl Validator for ValidatorChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn check(&self, record: &Record, raw: &[u8]) -> Result<(), String> {
        for v in &self.validators {
            v.check(record, raw)
                .map_err(|reason| format!("{}: {reason}", v.name()))?;
        }
        Ok(())
    }
}
