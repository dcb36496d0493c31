// src/raddb.rs

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum RadDbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("decryption error: {0}")]
    Decryption(String),
    #[error("encryption error: {0}")]
    Encryption(String),
    #[error("cache lock poisoned")]
    Poisoned,
}

/// Ключ шифрования (32 байта = 256 бит)
pub type MasterKey = [u8; 32];

/// Одна операция атомарного пакета [`RadDB::apply`]
#[derive(Debug, Clone)]
pub enum WriteOp {
    Set(String, Vec<u8>),
    Remove(String),
}

/// RadDB: зашифрованная embedded база ключ-значение.
///
/// Вся карта в памяти, на диск пишется целиком одним шифротекстом
/// AES-256-GCM (`nonce || ciphertext`).
pub struct RadDB {
    path: PathBuf,
    cipher: Aes256Gcm,
    cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl RadDB {
    pub fn open<P: AsRef<Path>>(path: P, key: &MasterKey) -> Result<Self, RadDbError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let db = Self {
            path: path.as_ref().to_path_buf(),
            cipher,
            cache: RwLock::new(HashMap::new()),
        };
        db.load()?;
        Ok(db)
    }

    /// Создать новый мастер-ключ (надо сохранить!)
    pub fn generate_key() -> MasterKey {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    fn read_cache(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Vec<u8>>>, RadDbError> {
        self.cache.read().map_err(|_| RadDbError::Poisoned)
    }

    fn write_cache(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Vec<u8>>>, RadDbError> {
        self.cache.write().map_err(|_| RadDbError::Poisoned)
    }

    fn load(&self) -> Result<(), RadDbError> {
        if !self.path.exists() {
            return Ok(());
        }

        let mut file = OpenOptions::new().read(true).open(&self.path)?;
        let mut encrypted = Vec::new();
        file.read_to_end(&mut encrypted)?;

        if encrypted.is_empty() {
            return Ok(());
        }
        if encrypted.len() < NONCE_LEN {
            return Err(RadDbError::Decryption("file too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_LEN);
        let payload = Payload {
            msg: ciphertext,
            aad: &[],
        };
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), payload)
            .map_err(|_| {
                RadDbError::Decryption("AES-GCM decryption failed (wrong key?)".to_string())
            })?;

        let data: HashMap<String, Vec<u8>> = bincode::deserialize(&plaintext)
            .map_err(|e| RadDbError::Serialization(e.to_string()))?;

        *self.write_cache()? = data;
        Ok(())
    }

    fn write_file(&self, data: &HashMap<String, Vec<u8>>) -> Result<(), RadDbError> {
        let plaintext =
            bincode::serialize(data).map_err(|e| RadDbError::Serialization(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let payload = Payload {
            msg: &plaintext,
            aad: &[],
        };
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), payload)
            .map_err(|_| RadDbError::Encryption("AES-GCM encryption failed".to_string()))?;

        // Пишем рядом и переименовываем, чтобы не оставить полфайла
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&nonce_bytes)?;
            file.write_all(&ciphertext)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RadDbError> {
        Ok(self.read_cache()?.get(key).cloned())
    }

    pub fn set(&self, key: String, value: Vec<u8>) -> Result<(), RadDbError> {
        self.apply(vec![WriteOp::Set(key, value)])
    }

    /// Применяет все `ops` и один раз пишет на диск. Если запись не удалась,
    /// карта в памяти откатывается: пакет применяется целиком или никак.
    pub fn apply(&self, ops: Vec<WriteOp>) -> Result<(), RadDbError> {
        let mut cache = self.write_cache()?;
        let mut undo: Vec<(String, Option<Vec<u8>>)> = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                WriteOp::Set(key, value) => {
                    let previous = cache.insert(key.clone(), value);
                    undo.push((key, previous));
                }
                WriteOp::Remove(key) => {
                    let previous = cache.remove(&key);
                    undo.push((key, previous));
                }
            }
        }

        if let Err(e) = self.write_file(&cache) {
            for (key, previous) in undo.into_iter().rev() {
                match previous {
                    Some(value) => cache.insert(key, value),
                    None => cache.remove(&key),
                };
            }
            return Err(e);
        }
        Ok(())
    }
}
