use blake3::Hasher;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::WorkflowError;
use super::engine::EngineKind;
use crate::aps::ArtifactFetcher;
use crate::aps::ApsError;
use crate::aps::auth::CredentialCache;
use crate::aps::automation::{
    Activity, AppBundleSpec, AutomationApi, Parameter, StringSetting, Verb,
};

/// Provisioned app bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleVersion {
    pub app_bundle: String,
    pub version: u32,
}

/// Provisioned activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityVersion {
    pub activity: String,
    pub version: u32,
}

/// Blake3 digest of a package.
pub fn package_digest(bytes: &[u8]) -> blake3::Hash {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Keeps remote app bundles and activities in step with their local
/// definitions. Re-running with unchanged input never publishes a new
/// version.
#[derive(Clone)]
pub struct Provisioner {
    automation: Arc<dyn AutomationApi>,
    fetcher: Arc<dyn ArtifactFetcher>,
    credentials: Arc<CredentialCache>,
    client_id: String,
    nickname: String,
    alias: String,
}

impl Provisioner {
    pub fn new(
        automation: Arc<dyn AutomationApi>,
        fetcher: Arc<dyn ArtifactFetcher>,
        credentials: Arc<CredentialCache>,
        client_id: impl Into<String>,
        nickname: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            automation,
            fetcher,
            credentials,
            client_id: client_id.into(),
            nickname: nickname.into(),
            alias: alias.into(),
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// `<nickname>.<name>+<alias>`
    pub fn qualified_id(&self, name: &str) -> String {
        format!("{}.{}+{}", self.nickname, name, self.alias)
    }

    /// Claim the nickname for these credentials if they have none yet.
    pub async fn setup_owner(&self) -> Result<(), WorkflowError> {
        info!("Setting up owner...");
        let token = self.credentials.internal().await?;
        let current = self.automation.nickname(&token.access_token).await?;

        if current == self.nickname {
            return Ok(());
        }
        if current != self.client_id {
            return Err(WorkflowError::NicknameMismatch {
                expected: self.nickname.clone(),
                actual: current,
            });
        }

        info!("No nickname for this clientId yet. Attempting to create one...");
        match self
            .automation
            .claim_nickname(&token.access_token, &self.nickname)
            .await
        {
            Ok(()) => Ok(()),
            Err(ApsError::Conflict(_)) => Err(WorkflowError::NicknameConflict(self.nickname.clone())),
            Err(err) => Err(err.into()),
        }
    }

    /// Create the bundle at its first version, or publish a new version when
    /// the remote package digest differs from the local one.
    pub async fn ensure_bundle(
        &self,
        name: &str,
        engine: &str,
        package: Vec<u8>,
    ) -> Result<BundleVersion, WorkflowError> {
        self.setup_owner().await?;
        let token = self.credentials.internal().await?;
        let qualified_id = self.qualified_id(name);
        let spec = AppBundleSpec {
            id: name.to_string(),
            engine: engine.to_string(),
            description: None,
        };

        let remote = match self
            .automation
            .app_bundle(&token.access_token, &qualified_id)
            .await
        {
            Ok(remote) => remote,
            Err(ApsError::NotFound(_)) => {
                info!("Creating appbundle {}...", qualified_id);
                let version = self
                    .automation
                    .create_app_bundle(&token.access_token, &spec, &self.alias, package)
                    .await?;
                return Ok(BundleVersion {
                    app_bundle: qualified_id,
                    version,
                });
            }
            Err(err) => return Err(err.into()),
        };

        info!("Found existing appbundle {} (v{})", qualified_id, remote.version);
        let remote_package = self.fetcher.fetch(&remote.package).await?;
        if package_digest(&remote_package) == package_digest(&package) {
            info!("Appbundle {} is unchanged", qualified_id);
            return Ok(BundleVersion {
                app_bundle: qualified_id,
                version: remote.version,
            });
        }

        info!("Updating appbundle {}...", qualified_id);
        let version = self
            .automation
            .update_app_bundle(&token.access_token, &spec, &self.alias, package)
            .await?;
        Ok(BundleVersion {
            app_bundle: qualified_id,
            version,
        })
    }

    /// Canonical activity for `bundle_name` on `engine`.
    pub fn activity_definition(
        &self,
        activity_name: &str,
        engine: &str,
        bundle_name: &str,
    ) -> Result<Activity, WorkflowError> {
        let kind = EngineKind::from_engine_id(engine)?;
        let attributes = kind.attributes();

        let parameter = |verb, description: &str, local_name: String, required| Parameter {
            verb,
            description: Some(description.to_string()),
            local_name: Some(local_name),
            required,
            zip: false,
            ondemand: false,
        };
        let parameters = BTreeMap::from([
            (
                "inputFile".to_string(),
                parameter(Verb::Get, "input file", "$(inputFile)".to_string(), true),
            ),
            (
                "inputJson".to_string(),
                parameter(Verb::Get, "input json", "params.json".to_string(), false),
            ),
            (
                "outputFile".to_string(),
                parameter(
                    Verb::Put,
                    "output file",
                    format!("outputFile.{}", attributes.extension),
                    true,
                ),
            ),
        ]);
        let settings = BTreeMap::from([(
            "script".to_string(),
            StringSetting {
                value: attributes.script.to_string(),
            },
        )]);

        Ok(Activity {
            id: Some(activity_name.to_string()),
            engine: engine.to_string(),
            command_line: vec![kind.command_line(bundle_name)],
            appbundles: vec![self.qualified_id(bundle_name)],
            parameters,
            settings,
            description: None,
            version: None,
        })
    }

    /// Create the activity, or publish a new version when the remote
    /// definition drifted from the canonical one.
    pub async fn ensure_activity(
        &self,
        activity_name: &str,
        engine: &str,
        bundle_name: &str,
    ) -> Result<ActivityVersion, WorkflowError> {
        let definition = self.activity_definition(activity_name, engine, bundle_name)?;
        self.setup_owner().await?;
        let token = self.credentials.internal().await?;
        let qualified_id = self.qualified_id(activity_name);

        let remote = match self
            .automation
            .activity(&token.access_token, &qualified_id)
            .await
        {
            Ok(remote) => remote,
            Err(ApsError::NotFound(_)) => {
                info!("Creating activity {}...", qualified_id);
                let version = self
                    .automation
                    .create_activity(&token.access_token, &definition, &self.alias)
                    .await?;
                return Ok(ActivityVersion {
                    activity: qualified_id,
                    version,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let remote_version = remote.version.unwrap_or(1);
        if definition.same_definition(&remote) {
            info!("Activity {} is unchanged", qualified_id);
            return Ok(ActivityVersion {
                activity: qualified_id,
                version: remote_version,
            });
        }

        info!("Updating activity {}...", qualified_id);
        let version = self
            .automation
            .update_activity(&token.access_token, &definition, &self.alias)
            .await?;
        Ok(ActivityVersion {
            activity: qualified_id,
            version,
        })
    }

    /// Every engine offered by the service, sorted.
    pub async fn engines(&self) -> Result<Vec<String>, WorkflowError> {
        let token = self.credentials.internal().await?;
        let mut engines = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let current = self
                .automation
                .engines(&token.access_token, page.as_deref())
                .await?;
            engines.extend(current.data);
            match current.pagination_token {
                Some(next) if !next.is_empty() => page = Some(next),
                _ => break,
            }
        }
        engines.sort();
        Ok(engines)
    }

    /// Activities owned by this nickname, without the nickname prefix and
    /// without `$LATEST` aliases.
    pub async fn defined_activities(&self) -> Result<Vec<String>, WorkflowError> {
        let token = self.credentials.internal().await?;
        let prefix = format!("{}.", self.nickname);
        let mut activities = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let current = self
                .automation
                .activities(&token.access_token, page.as_deref())
                .await?;
            activities.extend(
                current
                    .data
                    .into_iter()
                    .filter(|id| id.starts_with(&self.nickname) && !id.contains("$LATEST"))
                    .map(|id| id.replacen(&prefix, "", 1)),
            );
            match current.pagination_token {
                Some(next) if !next.is_empty() => page = Some(next),
                _ => break,
            }
        }
        Ok(activities)
    }

    /// Delete every app bundle and activity of the account.
    pub async fn clear_account(&self) -> Result<(), WorkflowError> {
        let token = self.credentials.internal().await?;
        self.automation.delete_account(&token.access_token).await?;
        info!("Account cleared, all appbundles & activities deleted");
        Ok(())
    }
}
