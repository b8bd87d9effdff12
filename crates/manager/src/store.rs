use crate::provider::CertificateMaterial;
use async_trait::async_trait;
use ssl_manager_common::Result;
use ssl_manager_common::entities::certificates;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";
const CHAIN_FILE: &str = "chain.pem";

/// 证书材料在磁盘上的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterialPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub chain_path: Option<PathBuf>,
}

impl KeyMaterialPaths {
    pub fn cert(&self) -> String {
        path_string(&self.cert_path)
    }

    pub fn key(&self) -> String {
        path_string(&self.key_path)
    }

    pub fn chain(&self) -> Option<String> {
        self.chain_path.as_deref().map(path_string)
    }

    fn all(&self) -> impl Iterator<Item = &Path> {
        [Some(self.cert_path.as_path()), Some(self.key_path.as_path()), self.chain_path.as_deref()]
            .into_iter()
            .flatten()
    }
}

impl From<&certificates::Model> for KeyMaterialPaths {
    fn from(cert: &certificates::Model) -> Self {
        Self {
            cert_path: PathBuf::from(&cert.cert_path),
            key_path: PathBuf::from(&cert.key_path),
            chain_path: cert
                .chain_path
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        }
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// 证书/私钥/链文件的持久化能力；删除必须幂等
#[async_trait]
pub trait KeyMaterialStore: Send + Sync {
    async fn save(&self, domain: &str, material: &CertificateMaterial) -> Result<KeyMaterialPaths>;
    async fn delete(&self, paths: &KeyMaterialPaths) -> Result<()>;
    /// 删除域名下的全部材料，用于清理写到一半的文件
    async fn purge(&self, domain: &str) -> Result<()>;
}

/// `<root>/<domain>/{cert,key,chain}.pem`
#[derive(Debug, Clone)]
pub struct FsKeyStore {
    root: PathBuf,
}

impl FsKeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl KeyMaterialStore for FsKeyStore {
    async fn save(&self, domain: &str, material: &CertificateMaterial) -> Result<KeyMaterialPaths> {
        let dir = self.root.join(domain);
        fs::create_dir_all(&dir).await?;

        let paths = KeyMaterialPaths {
            cert_path: dir.join(CERT_FILE),
            key_path: dir.join(KEY_FILE),
            chain_path: (!material.chain_pem.is_empty()).then(|| dir.join(CHAIN_FILE)),
        };

        write_private(&paths.cert_path, material.cert_pem.as_bytes()).await?;
        write_private(&paths.key_path, material.key_pem.as_bytes()).await?;
        match &paths.chain_path {
            Some(chain_path) => write_private(chain_path, material.chain_pem.as_bytes()).await?,
            // 上一次签发留下的链文件不再对应当前证书
            None => remove_if_present(&dir.join(CHAIN_FILE)).await?,
        }
        debug!(domain = %domain, dir = %dir.display(), "Key material written");
        Ok(paths)
    }

    async fn delete(&self, paths: &KeyMaterialPaths) -> Result<()> {
        let mut first_err = None;
        for path in paths.all() {
            if let Err(err) = remove_if_present(path).await {
                first_err.get_or_insert(err);
            }
        }

        // 目录可能仍有其他文件，失败不影响结果
        if let Some(dir) = paths.cert_path.parent() {
            let _ = fs::remove_dir(dir).await;
        }

        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    async fn purge(&self, domain: &str) -> Result<()> {
        let dir = self.root.join(domain);
        match fs::remove_dir_all(&dir).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Key material already absent");
            Ok(())
        }
        other => other,
    }
}

/// 写入临时文件后 rename，避免续期时留下半截文件
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("pem.tmp");
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await
}
