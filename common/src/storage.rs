use crate::{error::StorageError, hal::SettingStore};

/// Value of a record that was never written (erased EEPROM cells).
pub const UNINITIALIZED: i32 = -1;

/// Bytes occupied by the record.
pub const RECORD_LEN: usize = 4;

/// The single persisted integer: a 4-byte little-endian record at a fixed
/// address of the store.
///
/// Writes are immediate. Torn writes are not detected; durability is whatever
/// the medium guarantees for a 4-byte update.
#[derive(Debug)]
pub struct PersistentSetting<S> {
    store: S,
    addr: usize,
}

impl<S: SettingStore> PersistentSetting<S> {
    pub fn new(store: S, addr: usize) -> Self {
        Self { store, addr }
    }

    /// Raw stored value, [`UNINITIALIZED`] if the record was never written.
    pub fn load(&mut self) -> Result<i32, StorageError> {
        let mut record = [0_u8; RECORD_LEN];
        self.store.read(self.addr, &mut record)?;
        Ok(i32::from_le_bytes(record))
    }

    pub fn save(&mut self, value: i32) -> Result<(), StorageError> {
        self.store.write(self.addr, &value.to_le_bytes())
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
