//! Named index/subindex object dictionary.
//!
//! Grounded on `ObjectDictionaryBuilder` (ordered, binary searchable array
//! of objects keyed by `(index, subindex)`), generalized to a name-keyed
//! lookup (`"Object/Subobject"` settings paths) backed by a map rather than
//! a fixed-size array -- the `MAX_NUMBER_OF_OBJECTS` compile-time cap has no
//! equivalent need here since object counts are small and known only at
//! runtime per device profile.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ObjectDictionaryError {
    #[error("object {0:#06x}:{1:#04x} does not exist")]
    DoesNotExist(u16, u8),
    #[error("unknown setting '{0}'")]
    UnknownSetting(String),
}

/// A value stored in the dictionary. CANopen objects are narrow integers
/// or floats on the wire; a single numeric variant keeps the rest of the
/// core (settings merge, SDO write) from needing a type-erased `Any`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjectValue {
    I32(i32),
    U32(u32),
    I16(i16),
    U16(u16),
    U8(u8),
}

impl ObjectValue {
    pub fn as_i32(&self) -> i32 {
        match *self {
            ObjectValue::I32(v) => v,
            ObjectValue::U32(v) => v as i32,
            ObjectValue::I16(v) => v as i32,
            ObjectValue::U16(v) => v as i32,
            ObjectValue::U8(v) => v as i32,
        }
    }
}

/// `(index, subindex)` → value map plus a name index for settings paths
/// such as `"Polarity/0"`.
#[derive(Debug, Default)]
pub struct ObjectDictionary {
    by_address: BTreeMap<(u16, u8), ObjectValue>,
    names: BTreeMap<String, (u16, u8)>,
}

impl ObjectDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object under `name` at `(index, subindex)` with its
    /// initial value.
    pub fn register(&mut self, name: impl Into<String>, index: u16, subindex: u8, value: ObjectValue) {
        self.by_address.insert((index, subindex), value);
        self.names.insert(name.into(), (index, subindex));
    }

    pub fn get(&self, index: u16, subindex: u8) -> Result<ObjectValue, ObjectDictionaryError> {
        self.by_address
            .get(&(index, subindex))
            .copied()
            .ok_or(ObjectDictionaryError::DoesNotExist(index, subindex))
    }

    pub fn set(&mut self, index: u16, subindex: u8, value: ObjectValue) -> Result<(), ObjectDictionaryError> {
        let slot = self
            .by_address
            .get_mut(&(index, subindex))
            .ok_or(ObjectDictionaryError::DoesNotExist(index, subindex))?;
        *slot = value;
        Ok(())
    }

    /// Resolve a `"Object/Subobject"` settings path to its wire address,
    /// as needed by a caller that writes the value by SDO itself.
    pub fn resolve(&self, name: &str) -> Result<(u16, u8), ObjectDictionaryError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| ObjectDictionaryError::UnknownSetting(name.to_string()))
    }

    /// Resolve a `"Object/Subobject"` settings path (as used by settings
    /// merge and vendor defaults) and write it by SDO.
    pub fn set_by_name(&mut self, name: &str, value: ObjectValue) -> Result<(), ObjectDictionaryError> {
        let (index, subindex) = self.resolve(name)?;
        self.set(index, subindex, value)
    }

    pub fn get_by_name(&self, name: &str) -> Result<ObjectValue, ObjectDictionaryError> {
        let (index, subindex) = self.resolve(name)?;
        self.get(index, subindex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ObjectDictionary {
        let mut od = ObjectDictionary::new();
        od.register("Polarity/0", 0x607E, 0x00, ObjectValue::U8(0));
        od.register("Continuous Current Limit/0", 0x6075, 0x00, ObjectValue::U32(1500));
        od
    }

    #[test]
    fn get_set_roundtrip_by_address() {
        let mut od = sample();
        od.set(0x607E, 0x00, ObjectValue::U8(0xC0)).unwrap();
        assert_eq!(ObjectValue::U8(0xC0), od.get(0x607E, 0x00).unwrap());
    }

    #[test]
    fn get_set_roundtrip_by_name() {
        let mut od = sample();
        od.set_by_name("Polarity/0", ObjectValue::U8(0xC0)).unwrap();
        assert_eq!(ObjectValue::U8(0xC0), od.get_by_name("Polarity/0").unwrap());
    }

    #[test]
    fn unknown_name_is_an_error() {
        let od = sample();
        assert_eq!(
            Err(ObjectDictionaryError::UnknownSetting("Missing/0".into())),
            od.get_by_name("Missing/0")
        );
    }

    #[test]
    fn unregistered_address_is_an_error() {
        let od = sample();
        assert_eq!(
            Err(ObjectDictionaryError::DoesNotExist(0x9999, 0x00)),
            od.get(0x9999, 0x00)
        );
    }
}
