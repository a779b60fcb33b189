//! Key material: the development key, L1 keystores and the L2 dev keystore.

use std::fs;
use std::path::{Path, PathBuf};

use alloy_primitives::{Address, B256};
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::WalletConfig;

/// Publicly known private key that funds the development genesis account.
pub const DEV_PRIVATE_KEY: &str = "e887f7d17d07cc7b8004053fb8826f6657084e88904bb61590e498ca04704cf2";

/// Signer for [`DEV_PRIVATE_KEY`].
pub fn dev_signer() -> Result<PrivateKeySigner> {
    let key: B256 = DEV_PRIVATE_KEY
        .parse()
        .context("Invalid development private key")?;
    PrivateKeySigner::from_bytes(&key).context("Invalid development private key")
}

#[derive(Deserialize)]
struct KeystoreHeader {
    #[serde(default)]
    address: String,
}

/// Unlocks the key selected by `wallet` from an encrypted keystore.
///
/// `wallet.pathname` may name a keystore file or a directory of them. In a
/// directory the key whose `address` matches `wallet.account` is chosen, or
/// the first key when no account is given.
pub fn unlock_keystore(wallet: &WalletConfig) -> Result<PrivateKeySigner> {
    anyhow::ensure!(!wallet.pathname.is_empty(), "no keystore configured");
    let path = Path::new(&wallet.pathname);
    let file = if path.is_dir() {
        select_keystore_file(path, &wallet.account)?
    } else {
        path.to_path_buf()
    };

    PrivateKeySigner::decrypt_keystore(&file, wallet.password.as_bytes())
        .with_context(|| format!("Failed to decrypt keystore {}", file.display()))
}

fn select_keystore_file(dir: &Path, account: &str) -> Result<PathBuf> {
    let wanted = normalize_address(account);
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read keystore directory {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(contents) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(header) = serde_json::from_str::<KeystoreHeader>(&contents) else {
            continue;
        };
        if wanted.is_empty() || normalize_address(&header.address) == wanted {
            return Ok(path);
        }
    }

    if wanted.is_empty() {
        anyhow::bail!("no keys found in keystore {}", dir.display())
    }
    anyhow::bail!("account {account} not found in keystore {}", dir.display())
}

fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    trimmed
        .strip_prefix("0x")
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}

/// Keystore directory holding the development key.
///
/// Keys are stored as `dev-<address>.json` files in the encrypted
/// keystore format, sealed with the wallet password.
pub struct DevKeystore {
    dir: PathBuf,
}

impl DevKeystore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create keystore directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn key_name(address: Address) -> String {
        format!("dev-{}.json", normalize_address(&address.to_string()))
    }

    fn key_path(&self, address: Address) -> PathBuf {
        self.dir.join(Self::key_name(address))
    }

    pub fn has_address(&self, address: Address) -> bool {
        self.key_path(address).is_file()
    }

    /// Finds the key for `signer`'s address, importing it when absent.
    ///
    /// An existing file must decrypt with `password` to the same key.
    pub fn find_or_import(&self, signer: &PrivateKeySigner, password: &str) -> Result<Address> {
        let address = signer.address();
        let path = self.key_path(address);
        if self.has_address(address) {
            let stored = PrivateKeySigner::decrypt_keystore(&path, password.as_bytes())
                .with_context(|| format!("Failed to decrypt keystore file {}", path.display()))?;
            anyhow::ensure!(
                stored.address() == address,
                "keystore file {} does not hold the key for {address}",
                path.display()
            );
            return Ok(address);
        }

        let key = signer.credential().to_bytes();
        let name = Self::key_name(address);
        PrivateKeySigner::encrypt_keystore(
            &self.dir,
            &mut rand::thread_rng(),
            key,
            password.as_bytes(),
            Some(name.as_str()),
        )
        .with_context(|| format!("Failed to import key into {}", path.display()))?;
        restrict_permissions(&path)?;
        Ok(address)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict permissions of {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
