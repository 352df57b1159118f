//! Resource definitions and in-process wiring.

pub mod professors;
pub mod school_users;
pub mod schools;
pub mod students;
pub mod users;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use models::{Projection, ReferenceDeclaration};

use crate::errors::ServiceError;
use crate::facade::{EntityDefinition, EntityService};
use crate::notifications::{NotificationQueue, Notifier, RouterSubscriber, Subscriber};
use crate::router::ServiceRegistry;
use crate::schema::{FieldRule, Schema};
use crate::store::CollectionProvider;

/// Self-keyed reference from a school member to its school user.
pub fn user_reference() -> ReferenceDeclaration {
    ReferenceDeclaration::one("user", school_users::SERVICE)
        .keyed_by_own_id()
        .with_projection(Projection::of(["name", "email", "status"]))
}

pub(crate) fn user_snapshot() -> Schema {
    Schema::new()
        .field(FieldRule::string("id").required())
        .field(FieldRule::string("name"))
        .field(FieldRule::string("email"))
        .field(FieldRule::string("status"))
}

pub(crate) fn class_list() -> FieldRule {
    let class = Schema::new()
        .field(FieldRule::string("id").required())
        .field(FieldRule::string("name").len(1, 128));
    FieldRule::array_of("classes", class)
}

pub fn catalog() -> Vec<Arc<dyn EntityDefinition>> {
    vec![
        Arc::new(schools::Schools::new()),
        Arc::new(users::Users::new()),
        Arc::new(school_users::SchoolUsers::new()),
        Arc::new(professors::Professors::new()),
        Arc::new(students::Students::new()),
    ]
}

pub fn definition(name: &str) -> Option<Arc<dyn EntityDefinition>> {
    catalog().into_iter().find(|d| d.service_name() == name)
}

/// Build the services that run in this process. Each producer gets the
/// in-process consumers as synchronous subscribers, and the queue only when
/// `consumers` names a consumer deployed elsewhere.
pub fn build_local_services(
    local: &[String],
    store: Arc<dyn CollectionProvider>,
    registry: &Arc<ServiceRegistry>,
    queue: Option<Arc<dyn NotificationQueue>>,
    consumers: &HashMap<String, Vec<String>>,
) -> Result<Vec<Arc<EntityService>>, ServiceError> {
    let defs = local
        .iter()
        .map(|name| definition(name).ok_or_else(|| ServiceError::Unexpected(format!("unknown service `{name}`"))))
        .collect::<Result<Vec<_>, _>>()?;

    let mut services = Vec::with_capacity(defs.len());
    for def in &defs {
        let producer = def.service_name();
        let subscribers: Vec<Subscriber> = defs
            .iter()
            .flat_map(|consumer| {
                consumer
                    .subscriptions()
                    .into_iter()
                    .filter(|s| s.source == producer)
                    .map(|s| RouterSubscriber::subscriber(Arc::clone(registry), consumer.service_name(), s.projection))
                    .collect::<Vec<_>>()
            })
            .collect();
        let remote = consumers.get(producer).is_some_and(|cs| cs.iter().any(|c| !local.contains(c)));
        info!(
            service = producer,
            subscribers = ?subscribers.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            queued = remote,
            "service wired"
        );
        let notifier = Notifier::new(producer, subscribers, if remote { queue.clone() } else { None });
        services.push(Arc::new(EntityService::new(Arc::clone(def), Arc::clone(&store), Arc::clone(registry), notifier)));
    }
    Ok(services)
}
