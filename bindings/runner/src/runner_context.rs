use std::sync::Arc;

use load_tunnel_runner::prelude::UserValuesConstraint;
use order_client_instrumented::prelude::OrderApi;

use crate::correlation::CorrelationStore;

#[derive(Default, Debug)]
pub struct OrderRunnerContext {
    api: Option<Arc<OrderApi>>,
    orders: CorrelationStore,
}

impl UserValuesConstraint for OrderRunnerContext {}

impl OrderRunnerContext {
    pub fn api(&self) -> Option<&Arc<OrderApi>> {
        self.api.as_ref()
    }

    pub(crate) fn set_api(&mut self, api: OrderApi) {
        self.api = Some(Arc::new(api));
    }

    /// Order numbers created so far in this run.
    pub fn orders(&self) -> &CorrelationStore {
        &self.orders
    }
}
