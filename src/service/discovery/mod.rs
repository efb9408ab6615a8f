
use crate::service::anypoint::{AnypointClient, AnypointConfig, ApiError};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, Serialize)]
pub struct OrganizationRef {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRef {
    pub id: String,
    pub name: String,
    pub organization_id: String,
    pub organization_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_type: Option<String>,

    pub is_production: bool,
}

/// One discovery cycle's view of the platform, swapped wholesale.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub organizations: Vec<OrganizationRef>,
    pub environments: Vec<EnvironmentRef>,
    pub primary_organization_id: Option<String>,
    pub complete: bool,
}

/// Auto-discovers organizations and environments from the platform.
///
/// With auto-discovery disabled, the configured environments form a permanent
/// snapshot and no upstream calls are made.
pub struct DiscoveryService {
    client: Arc<AnypointClient>,
    config: Arc<AnypointConfig>,
    snapshot: ArcSwap<Snapshot>,
}

impl DiscoveryService {
    pub fn new(client: Arc<AnypointClient>, config: Arc<AnypointConfig>) -> Self {
        let initial = if config.auto_discovery {
            Snapshot::default()
        } else {
            let organization_id = config.organization_id.clone().unwrap_or_default();
            info!(
                environments = config.environments.len(),
                "auto-discovery disabled, using configured environments"
            );
            Snapshot {
                organizations: vec![OrganizationRef {
                    id: organization_id.clone(),
                    name: "Configured organization".to_owned(),
                }],
                environments: config
                    .environments
                    .iter()
                    .map(|env| EnvironmentRef {
                        id: env.id.clone(),
                        name: env.name.clone(),
                        organization_id: organization_id.clone(),
                        organization_name: "Configured organization".to_owned(),
                        environment_type: None,
                        is_production: false,
                    })
                    .collect(),
                primary_organization_id: Some(organization_id),
                complete: true,
            }
        };

        Self {
            client,
            config,
            snapshot: ArcSwap::from_pointee(initial),
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn is_complete(&self) -> bool {
        self.snapshot.load().complete
    }

    /// Runs one full discovery: organizations, then the environments of each.
    /// A single organization's failure is logged and skipped; the cycle still
    /// produces a snapshot.
    pub async fn discover(&self) -> Result<Arc<Snapshot>, ApiError> {
        let me = self.client.get_self().await?;

        let mut organizations: Vec<OrganizationRef> = Vec::new();
        let mut root_organization_id = None;

        if let Some((root, members)) = me
            .user
            .and_then(|user| user.organization.map(|root| (root, user.member_of_organizations)))
        {
            root_organization_id = Some(root.id.clone());
            info!(id = %root.id, "discovered root organization");
            organizations.push(OrganizationRef {
                name: root
                    .name
                    .unwrap_or_else(|| format!("Organization {}", root.id)),
                id: root.id,
            });

            for member in members {
                if organizations.iter().any(|org| org.id == member.id) {
                    continue;
                }
                organizations.push(OrganizationRef {
                    name: member
                        .name
                        .unwrap_or_else(|| format!("Organization {}", member.id)),
                    id: member.id,
                });
            }

            // Sub-orgs only listed by id get a placeholder name.
            for sub_id in root.sub_organization_ids {
                if organizations.iter().any(|org| org.id == sub_id) {
                    continue;
                }
                organizations.push(OrganizationRef {
                    name: format!("Sub-org {sub_id}"),
                    id: sub_id,
                });
            }
        }

        if let Some(configured) = self.config.organization_id.as_deref() {
            if !configured.is_empty() && !organizations.iter().any(|org| org.id == configured) {
                organizations.push(OrganizationRef {
                    id: configured.to_owned(),
                    name: "Configured organization".to_owned(),
                });
            }
        }

        let mut environments = Vec::new();
        for organization in &organizations {
            match self.client.list_environments(&organization.id).await {
                Ok(data) => {
                    for env in data {
                        debug!(
                            id = %env.id,
                            name = %env.name,
                            organization = %organization.name,
                            "discovered environment"
                        );
                        environments.push(EnvironmentRef {
                            id: env.id,
                            name: env.name,
                            organization_id: organization.id.clone(),
                            organization_name: organization.name.clone(),
                            environment_type: env.environment_type,
                            is_production: env.is_production,
                        });
                    }
                }
                Err(err) => {
                    warn!(
                        organization = %organization.name,
                        %err,
                        "could not list environments, skipping organization this cycle"
                    );
                }
            }
        }

        // An explicitly configured organization id is never overwritten by
        // the discovered root.
        let primary_organization_id = self
            .config
            .organization_id
            .clone()
            .filter(|id| !id.is_empty())
            .or(root_organization_id);

        let previous = self.snapshot.load_full();
        if environments.is_empty() && !previous.environments.is_empty() {
            warn!("discovery found no environments, keeping previous snapshot");
            environments = previous.environments.clone();
        }

        let snapshot = Arc::new(Snapshot {
            organizations,
            environments,
            primary_organization_id,
            complete: true,
        });

        info!(
            organizations = snapshot.organizations.len(),
            environments = snapshot.environments.len(),
            "discovery complete"
        );
        self.snapshot.store(snapshot.clone());

        Ok(snapshot)
    }

    /// Periodic refresh loop. The first refresh happens one interval after
    /// startup; the initial discovery runs during startup.
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.config.auto_discovery {
            return;
        }

        let interval = Duration::from_millis(self.config.discovery_refresh_interval_ms);
        loop {
            select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            debug!("refreshing organization and environment discovery");
            if let Err(err) = self.discover().await {
                error!(%err, "discovery refresh failed");
            }
        }
    }
}
