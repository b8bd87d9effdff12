use crate::provider::{CertificateMaterial, CertificateProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, OrderStatus, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use ssl_manager_common::{ManagerError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use x509_parser::pem::parse_x509_pem;

const ACCOUNT_FILE: &str = "account.json";
const PEM_END_CERT: &str = "-----END CERTIFICATE-----";

/// 待验证的 HTTP-01 key authorization，按 token 索引
#[derive(Clone, Default)]
pub struct AcmeChallengeStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl AcmeChallengeStore {
    pub async fn set(&self, token: String, key_auth: String) {
        self.inner.write().await.insert(token, key_auth);
    }

    pub async fn get(&self, token: &str) -> Option<String> {
        self.inner.read().await.get(token).cloned()
    }

    pub async fn remove(&self, token: &str) {
        self.inner.write().await.remove(token);
    }
}

#[derive(Debug, Clone)]
pub struct AcmeSettings {
    pub directory_url: String,
    pub contact_email: String,
    pub storage_dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct StoredAccount {
    directory_url: String,
    credentials: AccountCredentials,
}

/// 基于 instant-acme 的 HTTP-01 签发实现
pub struct AcmeProvider {
    settings: AcmeSettings,
    challenges: AcmeChallengeStore,
    account: OnceCell<Account>,
}

impl AcmeProvider {
    pub fn new(settings: AcmeSettings, challenges: AcmeChallengeStore) -> Self {
        Self {
            settings,
            challenges,
            account: OnceCell::new(),
        }
    }

    async fn account(&self) -> Result<&Account> {
        self.account
            .get_or_try_init(|| self.load_or_create_account())
            .await
    }

    async fn load_or_create_account(&self) -> Result<Account> {
        let path = self.settings.storage_dir.join(ACCOUNT_FILE);
        match fs::read(&path).await {
            Ok(bytes) => {
                let stored: StoredAccount = serde_json::from_slice(&bytes)?;
                if stored.directory_url == self.settings.directory_url {
                    let account = Account::builder()
                        .map_err(acme_err)?
                        .from_credentials(stored.credentials)
                        .await
                        .map_err(acme_err)?;
                    info!(directory = %self.settings.directory_url, "Loaded ACME account");
                    return Ok(account);
                }
                warn!(
                    stored = %stored.directory_url,
                    configured = %self.settings.directory_url,
                    "ACME directory changed, registering a new account"
                );
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let contact = format!("mailto:{}", self.settings.contact_email);
        let (account, credentials) = Account::builder()
            .map_err(acme_err)?
            .create(
                &NewAccount {
                    contact: &[contact.as_str()],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                self.settings.directory_url.clone(),
                None,
            )
            .await
            .map_err(acme_err)?;

        fs::create_dir_all(&self.settings.storage_dir).await?;
        let stored = StoredAccount {
            directory_url: self.settings.directory_url.clone(),
            credentials,
        };
        fs::write(&path, serde_json::to_vec_pretty(&stored)?).await?;
        info!(directory = %self.settings.directory_url, "Registered ACME account");
        Ok(account)
    }

    async fn order(
        &self,
        account: &Account,
        domain: &str,
        tokens: &mut Vec<String>,
    ) -> Result<(String, String)> {
        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(acme_err)?;

        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(acme_err)?;
            if authz.status == AuthorizationStatus::Valid {
                continue;
            }

            let mut challenge = authz
                .challenge(ChallengeType::Http01)
                .ok_or_else(|| ManagerError::provider("missing HTTP-01 challenge"))?;

            let key_auth = challenge.key_authorization().as_str().to_string();
            let token = challenge.token.clone();

            self.challenges.set(token.clone(), key_auth).await;
            tokens.push(token);
            challenge.set_ready().await.map_err(acme_err)?;
        }

        let status = order
            .poll_ready(&RetryPolicy::default())
            .await
            .map_err(acme_err)?;
        if status != OrderStatus::Ready {
            return Err(ManagerError::provider(format!("order not ready: {:?}", status)));
        }

        let key_pem = order.finalize().await.map_err(acme_err)?;
        let chain_pem = order
            .poll_certificate(&RetryPolicy::default())
            .await
            .map_err(acme_err)?;
        Ok((chain_pem, key_pem))
    }
}

#[async_trait]
impl CertificateProvider for AcmeProvider {
    async fn create_certificate(&self, domain: &str) -> Result<CertificateMaterial> {
        let account = self.account().await?;

        let mut tokens = Vec::new();
        let result = self.order(account, domain, &mut tokens).await;
        for token in &tokens {
            self.challenges.remove(token).await;
        }
        let (chain_pem, key_pem) = result?;

        let (leaf_pem, _) = split_chain(&chain_pem);
        let parsed = parse_certificate(&leaf_pem)?;
        info!(domain = %domain, valid_to = %parsed.valid_to, "ACME certificate issued");

        Ok(CertificateMaterial {
            cert_pem: leaf_pem,
            key_pem,
            chain_pem,
            issuer: parsed.issuer,
            valid_from: parsed.valid_from,
            valid_to: parsed.valid_to,
        })
    }
}

fn acme_err(err: instant_acme::Error) -> ManagerError {
    ManagerError::provider(err.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    pub issuer: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

/// 拆分完整链：第一个证书为叶子，其余为中间证书
pub fn split_chain(chain_pem: &str) -> (String, String) {
    match chain_pem.find(PEM_END_CERT) {
        Some(idx) => {
            let cut = idx + PEM_END_CERT.len();
            let leaf = format!("{}\n", chain_pem[..cut].trim());
            let rest = chain_pem[cut..].trim();
            let rest = if rest.is_empty() {
                String::new()
            } else {
                format!("{}\n", rest)
            };
            (leaf, rest)
        }
        None => (chain_pem.to_string(), String::new()),
    }
}

/// 从 PEM 读取签发者与有效期；签发者优先取组织名
pub fn parse_certificate(cert_pem: &str) -> Result<ParsedCertificate> {
    let (_, pem) = parse_x509_pem(cert_pem.as_bytes())
        .map_err(|err| ManagerError::provider(format!("invalid certificate PEM: {}", err)))?;
    let cert = pem
        .parse_x509()
        .map_err(|err| ManagerError::provider(format!("invalid certificate: {}", err)))?;

    let issuer = cert
        .issuer()
        .iter_organization()
        .next()
        .and_then(|org| org.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| cert.issuer().to_string());

    let validity = cert.validity();
    Ok(ParsedCertificate {
        issuer,
        valid_from: to_utc(&validity.not_before)?,
        valid_to: to_utc(&validity.not_after)?,
    })
}

fn to_utc(at: &x509_parser::time::ASN1Time) -> Result<DateTime<Utc>> {
    let at = at.to_datetime();
    DateTime::<Utc>::from_timestamp(at.unix_timestamp(), at.nanosecond())
        .ok_or_else(|| ManagerError::provider("invalid certificate timestamp"))
}
