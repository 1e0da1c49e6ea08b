use server_api::ApiContext;

use crate::broker::Broker;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) broker: Broker,
    pub(crate) max_body_bytes: usize,
}
