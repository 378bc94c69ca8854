use std::sync::Arc;

use crate::models::vip::{VipPayment, VipRequest};
use crate::repositories::store::{get_as, list_as, set_as, RemoteStore};

#[derive(Clone)]
pub struct VipRepository {
    store: Arc<dyn RemoteStore>,
}

impl VipRepository {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn save_request(&self, request: &VipRequest) -> Result<(), anyhow::Error> {
        set_as(
            self.store.as_ref(),
            &format!("vipRequests/{}", request.id),
            request,
        )
        .await
    }

    pub async fn get_request(&self, id: &str) -> Result<Option<VipRequest>, anyhow::Error> {
        get_as(self.store.as_ref(), &format!("vipRequests/{}", id)).await
    }

    pub async fn list_requests(&self) -> Result<Vec<VipRequest>, anyhow::Error> {
        let mut requests: Vec<VipRequest> = list_as(self.store.as_ref(), "vipRequests").await?;
        requests.sort_by_key(|r| r.requested_at);
        Ok(requests)
    }

    pub async fn get_payment(&self, charge_id: &str) -> Result<Option<VipPayment>, anyhow::Error> {
        get_as(self.store.as_ref(), &format!("vipPayments/{}", charge_id)).await
    }

    pub async fn save_payment(&self, payment: &VipPayment) -> Result<(), anyhow::Error> {
        set_as(
            self.store.as_ref(),
            &format!("vipPayments/{}", payment.charge_id),
            payment,
        )
        .await
    }
}
