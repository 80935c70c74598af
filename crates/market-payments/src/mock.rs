//! Mock payment gateway for tests.
//!
//! Records every call, mints deterministic IDs (`acct_mock_1`,
//! `tr_mock_2`, ...), and can be told to fail transfers or payouts to
//! exercise the compensation paths.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use market_core::AccountId;

use crate::error::{PaymentError, Result};
use crate::gateway::{
    CheckoutParams, CheckoutSession, OnboardingLink, PaymentGateway, PayoutId, TransferId,
};

/// One recorded gateway invocation
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayCall {
    AccountCreated {
        email: String,
    },
    OnboardingLinkCreated {
        account: AccountId,
    },
    SessionCreated {
        params: CheckoutParams,
    },
    TransferCreated {
        destination: AccountId,
        amount_cents: i64,
        transfer_group: String,
    },
    PayoutCreated {
        account: AccountId,
        amount_cents: i64,
    },
}

#[derive(Default)]
pub struct MockGateway {
    calls: Mutex<Vec<GatewayCall>>,
    counter: AtomicU64,
    fail_transfers: AtomicBool,
    fail_payouts: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every transfer fail with a provider error
    pub fn with_failing_transfers(self) -> Self {
        self.fail_transfers.store(true, Ordering::SeqCst);
        self
    }

    /// Make every payout fail with a provider error
    pub fn with_failing_payouts(self) -> Self {
        self.fail_payouts.store(true, Ordering::SeqCst);
        self
    }

    /// Everything the gateway has been asked to do, in order
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Cents moved by transfers so far
    pub fn transferred_cents(&self) -> i64 {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                GatewayCall::TransferCreated { amount_cents, .. } => Some(*amount_cents),
                _ => None,
            })
            .sum()
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_express_account(&self, email: &str) -> Result<AccountId> {
        let account = AccountId::from_string(format!("acct_mock_{}", self.next()));
        self.record(GatewayCall::AccountCreated {
            email: email.to_string(),
        });
        Ok(account)
    }

    async fn create_onboarding_link(
        &self,
        account: &AccountId,
        _refresh_url: &str,
        _return_url: &str,
    ) -> Result<OnboardingLink> {
        self.record(GatewayCall::OnboardingLinkCreated {
            account: account.clone(),
        });
        Ok(OnboardingLink {
            url: format!("https://connect.mock/onboarding/{account}"),
            expires_at: None,
        })
    }

    async fn create_checkout_session(&self, params: CheckoutParams) -> Result<CheckoutSession> {
        let id = format!("cs_mock_{}", self.next());
        self.record(GatewayCall::SessionCreated {
            params: params.clone(),
        });
        Ok(CheckoutSession {
            url: format!("https://checkout.mock/session/{id}"),
            id,
        })
    }

    async fn create_transfer(
        &self,
        destination: &AccountId,
        amount_cents: i64,
        transfer_group: &str,
    ) -> Result<TransferId> {
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(PaymentError::Provider("mock transfer failure".into()));
        }
        let id = TransferId::from_string(format!("tr_mock_{}", self.next()));
        self.record(GatewayCall::TransferCreated {
            destination: destination.clone(),
            amount_cents,
            transfer_group: transfer_group.to_string(),
        });
        Ok(id)
    }

    async fn create_payout(&self, account: &AccountId, amount_cents: i64) -> Result<PayoutId> {
        if self.fail_payouts.load(Ordering::SeqCst) {
            return Err(PaymentError::Provider("mock payout failure".into()));
        }
        let id = PayoutId::from_string(format!("po_mock_{}", self.next()));
        self.record(GatewayCall::PayoutCreated {
            account: account.clone(),
            amount_cents,
        });
        Ok(id)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_mints_sequential_ids_and_records_calls() {
        let gateway = MockGateway::new();
        let a = gateway.create_express_account("one@test").await.unwrap();
        let b = gateway.create_express_account("two@test").await.unwrap();
        assert_eq!(a.as_str(), "acct_mock_1");
        assert_eq!(b.as_str(), "acct_mock_2");
        assert_eq!(gateway.calls().len(), 2);
    }

    #[tokio::test]
    async fn failing_transfers_do_not_record() {
        let gateway = MockGateway::new().with_failing_transfers();
        let dest = AccountId::from_string("acct_x");
        let err = gateway.create_transfer(&dest, 500, "g").await.unwrap_err();
        assert!(matches!(err, PaymentError::Provider(_)));
        assert!(gateway.calls().is_empty());
        assert_eq!(gateway.transferred_cents(), 0);
    }
}
