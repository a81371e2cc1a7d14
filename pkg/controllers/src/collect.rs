use std::collections::HashMap;

use anyhow::Context;
use chrono::Duration;

use pkg_constants::annotations::{
    PRESCALE_STACKS_ANNOTATION_KEY, RESET_MIN_REPLICAS_DELAY_ANNOTATION_KEY,
};
use pkg_constants::defaults::DEFAULT_RESET_MIN_REPLICAS_DELAY_SECS;
use pkg_constants::names::SEGMENT_SUFFIX;
use pkg_core::container::{StackContainer, StackSetContainer};
use pkg_core::traffic::{PrescalingReconciler, TrafficReconciler};
use pkg_state::client::ApiClient;
use pkg_types::stackset::StackSet;

use crate::stackset::StackSetConfig;

/// Reads the per-StackSet reset delay override, falling back to the
/// default when the annotation is absent or unparsable.
fn reset_delay(stackset: &StackSet) -> Duration {
    let secs = stackset
        .metadata
        .annotations
        .get(RESET_MIN_REPLICAS_DELAY_ANNOTATION_KEY)
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RESET_MIN_REPLICAS_DELAY_SECS);
    Duration::seconds(secs as i64)
}

/// Chooses the tick's traffic policy from the StackSet annotations. The
/// choice is made exactly once per tick, when the aggregate is built.
fn select_reconciler(stackset: &StackSet) -> TrafficReconciler {
    if stackset
        .metadata
        .annotations
        .contains_key(PRESCALE_STACKS_ANNOTATION_KEY)
    {
        TrafficReconciler::Prescaling(PrescalingReconciler {
            reset_delay: reset_delay(stackset),
        })
    } else {
        TrafficReconciler::Simple
    }
}

/// Builds the tick-scoped aggregates: one unfiltered list call per resource
/// kind, each returned object attached to the stack or stackset owning it
/// exclusively. Resources with zero or multiple owner references are
/// skipped. Any listing failure aborts the whole tick; the partial index is
/// discarded with it.
pub async fn collect_resources(
    client: &dyn ApiClient,
    config: &StackSetConfig,
    watched: &HashMap<String, StackSet>,
) -> anyhow::Result<HashMap<String, StackSetContainer>> {
    let mut containers: HashMap<String, StackSetContainer> = watched
        .iter()
        .map(|(uid, stackset)| {
            (
                uid.clone(),
                StackSetContainer::new(
                    stackset.clone(),
                    select_reconciler(stackset),
                    &config.backend_weights_annotation_key,
                ),
            )
        })
        .collect();

    collect_stacks(client, config, &mut containers).await?;
    collect_ingresses(client, config, &mut containers).await?;
    if config.route_group_support_enabled {
        collect_route_groups(client, config, &mut containers).await?;
    }
    collect_deployments(client, config, &mut containers).await?;
    collect_services(client, config, &mut containers).await?;
    collect_autoscalers(client, config, &mut containers).await?;
    if config.config_map_support_enabled {
        collect_config_maps(client, config, &mut containers).await?;
    }
    if config.secret_support_enabled {
        collect_secrets(client, config, &mut containers).await?;
    }
    if config.credentials_support_enabled {
        collect_credentials_sets(client, config, &mut containers).await?;
    }

    Ok(containers)
}

fn find_stack<'a>(
    containers: &'a mut HashMap<String, StackSetContainer>,
    owner_uid: &str,
) -> Option<&'a mut StackContainer> {
    containers
        .values_mut()
        .find_map(|ssc| ssc.stack_containers.get_mut(owner_uid))
}

/// Finds the stack whose deployment carries the given UID. Services and
/// autoscalers used to be owned by the deployment instead of the stack;
/// dropping this lookup would silently orphan resources predating the
/// ownership change.
fn find_stack_by_deployment<'a>(
    containers: &'a mut HashMap<String, StackSetContainer>,
    deployment_uid: &str,
) -> Option<&'a mut StackContainer> {
    containers.values_mut().find_map(|ssc| {
        ssc.stack_containers.values_mut().find(|sc| {
            sc.resources
                .deployment
                .as_ref()
                .is_some_and(|d| d.metadata.uid == deployment_uid)
        })
    })
}

async fn collect_stacks(
    client: &dyn ApiClient,
    config: &StackSetConfig,
    containers: &mut HashMap<String, StackSetContainer>,
) -> anyhow::Result<()> {
    let stacks = client
        .list_stacks(&config.namespace)
        .await
        .context("failed to list Stacks")?;
    for stack in stacks {
        let Some(owner) = stack.metadata.owner_uid() else {
            continue;
        };
        if let Some(ssc) = containers.get_mut(owner) {
            ssc.stack_containers
                .insert(stack.metadata.uid.clone(), StackContainer::new(stack));
        }
    }
    Ok(())
}

async fn collect_ingresses(
    client: &dyn ApiClient,
    config: &StackSetConfig,
    containers: &mut HashMap<String, StackSetContainer>,
) -> anyhow::Result<()> {
    let ingresses: Vec<pkg_types::ingress::Ingress> = client
        .list(&config.namespace)
        .await
        .context("failed to list Ingresses")?;
    for ingress in ingresses {
        let Some(owner) = ingress.metadata.owner_uid().map(str::to_string) else {
            continue;
        };
        if let Some(ssc) = containers.get_mut(&owner) {
            ssc.ingress = Some(ingress);
            continue;
        }
        if let Some(sc) = find_stack(containers, &owner) {
            if ingress.metadata.name.ends_with(SEGMENT_SUFFIX) {
                sc.resources.ingress_segment = Some(ingress);
            } else {
                sc.resources.ingress = Some(ingress);
            }
        }
    }
    Ok(())
}

async fn collect_route_groups(
    client: &dyn ApiClient,
    config: &StackSetConfig,
    containers: &mut HashMap<String, StackSetContainer>,
) -> anyhow::Result<()> {
    let route_groups: Vec<pkg_types::routegroup::RouteGroup> = client
        .list(&config.namespace)
        .await
        .context("failed to list RouteGroups")?;
    for route_group in route_groups {
        let Some(owner) = route_group.metadata.owner_uid().map(str::to_string) else {
            continue;
        };
        if let Some(ssc) = containers.get_mut(&owner) {
            ssc.route_group = Some(route_group);
            continue;
        }
        if let Some(sc) = find_stack(containers, &owner) {
            if route_group.metadata.name.ends_with(SEGMENT_SUFFIX) {
                sc.resources.route_group_segment = Some(route_group);
            } else {
                sc.resources.route_group = Some(route_group);
            }
        }
    }
    Ok(())
}

async fn collect_deployments(
    client: &dyn ApiClient,
    config: &StackSetConfig,
    containers: &mut HashMap<String, StackSetContainer>,
) -> anyhow::Result<()> {
    let deployments: Vec<pkg_types::deployment::Deployment> = client
        .list(&config.namespace)
        .await
        .context("failed to list Deployments")?;
    for deployment in deployments {
        let Some(owner) = deployment.metadata.owner_uid().map(str::to_string) else {
            continue;
        };
        if let Some(sc) = find_stack(containers, &owner) {
            sc.resources.deployment = Some(deployment);
        }
    }
    Ok(())
}

async fn collect_services(
    client: &dyn ApiClient,
    config: &StackSetConfig,
    containers: &mut HashMap<String, StackSetContainer>,
) -> anyhow::Result<()> {
    let services: Vec<pkg_types::service::Service> = client
        .list(&config.namespace)
        .await
        .context("failed to list Services")?;
    for service in services {
        let Some(owner) = service.metadata.owner_uid().map(str::to_string) else {
            continue;
        };
        if let Some(sc) = find_stack(containers, &owner) {
            sc.resources.service = Some(service);
        } else if let Some(sc) = find_stack_by_deployment(containers, &owner) {
            sc.resources.service = Some(service);
        }
    }
    Ok(())
}

async fn collect_autoscalers(
    client: &dyn ApiClient,
    config: &StackSetConfig,
    containers: &mut HashMap<String, StackSetContainer>,
) -> anyhow::Result<()> {
    let autoscalers: Vec<pkg_types::hpa::HorizontalAutoscaler> = client
        .list(&config.namespace)
        .await
        .context("failed to list HorizontalAutoscalers")?;
    for autoscaler in autoscalers {
        let Some(owner) = autoscaler.metadata.owner_uid().map(str::to_string) else {
            continue;
        };
        if let Some(sc) = find_stack(containers, &owner) {
            sc.resources.autoscaler = Some(autoscaler);
        } else if let Some(sc) = find_stack_by_deployment(containers, &owner) {
            sc.resources.autoscaler = Some(autoscaler);
        }
    }
    Ok(())
}

async fn collect_config_maps(
    client: &dyn ApiClient,
    config: &StackSetConfig,
    containers: &mut HashMap<String, StackSetContainer>,
) -> anyhow::Result<()> {
    let config_maps: Vec<pkg_types::configmap::ConfigMap> = client
        .list(&config.namespace)
        .await
        .context("failed to list ConfigMaps")?;
    for config_map in config_maps {
        let Some(owner) = config_map.metadata.owner_uid().map(str::to_string) else {
            continue;
        };
        if let Some(sc) = find_stack(containers, &owner) {
            sc.resources.config_maps.push(config_map);
        }
    }
    Ok(())
}

async fn collect_secrets(
    client: &dyn ApiClient,
    config: &StackSetConfig,
    containers: &mut HashMap<String, StackSetContainer>,
) -> anyhow::Result<()> {
    let secrets: Vec<pkg_types::secret::Secret> = client
        .list(&config.namespace)
        .await
        .context("failed to list Secrets")?;
    for secret in secrets {
        let Some(owner) = secret.metadata.owner_uid().map(str::to_string) else {
            continue;
        };
        if let Some(sc) = find_stack(containers, &owner) {
            sc.resources.secrets.push(secret);
        }
    }
    Ok(())
}

async fn collect_credentials_sets(
    client: &dyn ApiClient,
    config: &StackSetConfig,
    containers: &mut HashMap<String, StackSetContainer>,
) -> anyhow::Result<()> {
    let credentials_sets: Vec<pkg_types::credentials::PlatformCredentialsSet> = client
        .list(&config.namespace)
        .await
        .context("failed to list PlatformCredentialsSets")?;
    for credentials_set in credentials_sets {
        let Some(owner) = credentials_set.metadata.owner_uid().map(str::to_string) else {
            continue;
        };
        if let Some(sc) = find_stack(containers, &owner) {
            sc.resources.credentials_sets.push(credentials_set);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_state::client::ChildApi;
    use pkg_state::store::InMemoryApi;
    use pkg_types::deployment::{Deployment, DeploymentSpec};
    use pkg_types::metadata::ObjectMeta;
    use pkg_types::service::{Service, ServiceSpec};
    use pkg_types::stack::{Stack, StackSpec, StackStatus};
    use pkg_types::stackset::{StackSetSpec, StackSetStatus, StackTemplate};

    fn make_stackset(name: &str) -> StackSet {
        StackSet {
            metadata: ObjectMeta::new(name, "default"),
            spec: StackSetSpec {
                stack_template: StackTemplate {
                    version: "v1".to_string(),
                    spec: StackSpec {
                        replicas: 1,
                        pod_template: Default::default(),
                        service_ports: vec![],
                        autoscaler: None,
                        configuration_resources: vec![],
                    },
                },
                traffic: vec![],
                ingress: None,
                route_group: None,
                stack_lifecycle: Default::default(),
            },
            status: StackSetStatus::default(),
        }
    }

    async fn seed(api: &InMemoryApi) -> (StackSet, Stack) {
        let stackset = api.create_stack_set(&make_stackset("app")).await.unwrap();
        let stack = Stack {
            metadata: ObjectMeta::new("app-v1", "default").owned_by(
                "StackSet",
                "app",
                &stackset.metadata.uid,
            ),
            spec: stackset.spec.stack_template.spec.clone(),
            status: StackStatus::default(),
        };
        let stack = api.create_stack(&stack).await.unwrap();
        (stackset, stack)
    }

    fn watched(stackset: &StackSet) -> HashMap<String, StackSet> {
        HashMap::from([(stackset.metadata.uid.clone(), stackset.clone())])
    }

    #[tokio::test]
    async fn owned_resources_are_attached() {
        let api = InMemoryApi::new();
        let (stackset, stack) = seed(&api).await;

        let deployment = Deployment {
            metadata: ObjectMeta::new("app-v1", "default").owned_by(
                "Stack",
                "app-v1",
                &stack.metadata.uid,
            ),
            spec: DeploymentSpec {
                replicas: 1,
                template: Default::default(),
                selector: Default::default(),
            },
            status: Default::default(),
        };
        api.create(&deployment).await.unwrap();

        let config = StackSetConfig::default();
        let containers = collect_resources(&api, &config, &watched(&stackset))
            .await
            .unwrap();
        let ssc = &containers[&stackset.metadata.uid];
        let sc = &ssc.stack_containers[&stack.metadata.uid];
        assert!(sc.resources.deployment.is_some());
    }

    #[tokio::test]
    async fn unowned_and_multi_owned_resources_are_skipped() {
        let api = InMemoryApi::new();
        let (stackset, stack) = seed(&api).await;

        let orphan = Service {
            metadata: ObjectMeta::new("orphan", "default"),
            spec: ServiceSpec {
                selector: Default::default(),
                ports: vec![],
            },
        };
        api.create(&orphan).await.unwrap();

        let contested = Service {
            metadata: ObjectMeta::new("contested", "default")
                .owned_by("Stack", "app-v1", &stack.metadata.uid)
                .owned_by("Stack", "app-v2", "other-uid"),
            spec: ServiceSpec {
                selector: Default::default(),
                ports: vec![],
            },
        };
        api.create(&contested).await.unwrap();

        let config = StackSetConfig::default();
        let containers = collect_resources(&api, &config, &watched(&stackset))
            .await
            .unwrap();
        let sc = &containers[&stackset.metadata.uid].stack_containers[&stack.metadata.uid];
        assert!(sc.resources.service.is_none());
    }

    #[tokio::test]
    async fn service_owned_by_deployment_is_found_transitively() {
        let api = InMemoryApi::new();
        let (stackset, stack) = seed(&api).await;

        let deployment = Deployment {
            metadata: ObjectMeta::new("app-v1", "default").owned_by(
                "Stack",
                "app-v1",
                &stack.metadata.uid,
            ),
            spec: DeploymentSpec {
                replicas: 1,
                template: Default::default(),
                selector: Default::default(),
            },
            status: Default::default(),
        };
        let deployment = api.create(&deployment).await.unwrap();

        // Historical ownership: the service points at the deployment.
        let service = Service {
            metadata: ObjectMeta::new("app-v1", "default").owned_by(
                "Deployment",
                "app-v1",
                &deployment.metadata.uid,
            ),
            spec: ServiceSpec {
                selector: Default::default(),
                ports: vec![],
            },
        };
        api.create(&service).await.unwrap();

        let config = StackSetConfig::default();
        let containers = collect_resources(&api, &config, &watched(&stackset))
            .await
            .unwrap();
        let sc = &containers[&stackset.metadata.uid].stack_containers[&stack.metadata.uid];
        assert!(sc.resources.service.is_some());
    }

    #[tokio::test]
    async fn segment_suffix_splits_main_and_segment_slots() {
        let api = InMemoryApi::new();
        let (stackset, stack) = seed(&api).await;

        let segment_name = format!("app-v1{}", SEGMENT_SUFFIX);
        for name in ["app-v1", segment_name.as_str()] {
            let ingress = pkg_types::ingress::Ingress {
                metadata: ObjectMeta::new(name, "default").owned_by(
                    "Stack",
                    "app-v1",
                    &stack.metadata.uid,
                ),
                spec: Default::default(),
            };
            api.create(&ingress).await.unwrap();
        }

        let config = StackSetConfig::default();
        let containers = collect_resources(&api, &config, &watched(&stackset))
            .await
            .unwrap();
        let sc = &containers[&stackset.metadata.uid].stack_containers[&stack.metadata.uid];
        assert!(sc.resources.ingress.is_some());
        assert!(sc.resources.ingress_segment.is_some());
    }

    #[test]
    fn prescale_annotation_selects_prescaling_policy() {
        let mut stackset = make_stackset("app");
        assert!(matches!(
            select_reconciler(&stackset),
            TrafficReconciler::Simple
        ));

        stackset
            .metadata
            .annotations
            .insert(PRESCALE_STACKS_ANNOTATION_KEY.to_string(), "true".to_string());
        stackset.metadata.annotations.insert(
            RESET_MIN_REPLICAS_DELAY_ANNOTATION_KEY.to_string(),
            "120".to_string(),
        );
        match select_reconciler(&stackset) {
            TrafficReconciler::Prescaling(p) => {
                assert_eq!(p.reset_delay, Duration::seconds(120));
            }
            TrafficReconciler::Simple => panic!("expected prescaling"),
        }
    }
}
