mod checks;
#[cfg(any(test, feature = "testing"))]
mod mock;
mod order_api;
mod sign;
mod transport;

pub mod prelude {
    pub use crate::checks::{ApiEnvelope, ResponseChecks};
    #[cfg(any(test, feature = "testing"))]
    pub use crate::mock::MockTransport;
    pub use crate::order_api::{
        order_number, CreatedOrder, HealthPolicy, MerchantCredentials, NewOrder, OrderApi,
        CREATE_ORDER, HEALTH_CHECK, HEALTH_CHECK_TIME, ORDER_CREATION_FAILURE,
        ORDER_CREATION_SUCCESS, ORDER_CREATION_TIME, ORDER_QUERY_TIME, QUERY_ORDER,
    };
    pub use crate::sign::{
        sign, ParamValue, ParameterMap, SignError, SignedParameterSet, SIGN_FIELD,
    };
    pub use crate::transport::{
        HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
        USER_AGENT,
    };
}
