// ── Entity APIs ──
//
// Typed access per collection plus the type-erased view the backup
// engine works through.

mod entity;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use entity::EntityApi;

use crate::context::CoreContext;
use crate::error::CoreError;
use crate::model::{
    Backup, Collection, Dashboard, DataRepository, Field, Firmware, ForwardPayload, Gateway,
    Handler, Node, Schedule, ServiceToken, Settings, Source, Task, User, VirtualAssistant,
    VirtualDevice,
};
use crate::storage::{FindResult, Pagination};

/// A collection seen without its concrete entity type. Rows go out as
/// stored documents and come back through the typed decoder.
#[async_trait]
pub trait BackupApi: Send + Sync {
    fn collection(&self) -> Collection;

    async fn export_page(&self, pagination: &Pagination) -> Result<FindResult, CoreError>;

    /// Decode `rows` into the API's entity type and import each one.
    async fn import_rows(&self, rows: Vec<Value>) -> Result<usize, CoreError>;
}

/// Collection name (as used in dump file names) to its API.
pub type ApiMap = BTreeMap<String, Arc<dyn BackupApi>>;

fn entry<T: crate::model::Entity>(ctx: &Arc<CoreContext>) -> (String, Arc<dyn BackupApi>) {
    (
        T::COLLECTION.to_string(),
        Arc::new(EntityApi::<T>::new(Arc::clone(ctx))),
    )
}

/// APIs for every collection.
pub fn default_api_map(ctx: &Arc<CoreContext>) -> ApiMap {
    BTreeMap::from([
        entry::<Gateway>(ctx),
        entry::<Node>(ctx),
        entry::<Source>(ctx),
        entry::<Field>(ctx),
        entry::<Handler>(ctx),
        entry::<Task>(ctx),
        entry::<Schedule>(ctx),
        entry::<VirtualAssistant>(ctx),
        entry::<Firmware>(ctx),
        entry::<ForwardPayload>(ctx),
        entry::<DataRepository>(ctx),
        entry::<Dashboard>(ctx),
        entry::<Settings>(ctx),
        entry::<User>(ctx),
        entry::<ServiceToken>(ctx),
        entry::<VirtualDevice>(ctx),
        entry::<Backup>(ctx),
    ])
}
