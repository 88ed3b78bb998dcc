use load_tunnel_runner::prelude::UserValuesConstraint;

#[derive(Default, Debug)]
pub struct OrderWorkerContext {
    orders_created: u64,
    last_order_no: Option<String>,
}

impl UserValuesConstraint for OrderWorkerContext {}

impl OrderWorkerContext {
    pub fn orders_created(&self) -> u64 {
        self.orders_created
    }

    pub fn last_order_no(&self) -> Option<&str> {
        self.last_order_no.as_deref()
    }

    pub(crate) fn record_created(&mut self, order_no: String) {
        self.orders_created += 1;
        self.last_order_no = Some(order_no);
    }
}
