//! Wallet recharges through the gateway and worker withdrawals.

use super::notify::{Notification, NotificationKind};
use super::CoreContext;
use crate::db::NewPayment;
use crate::domain::payment::new_reference;
use crate::domain::{
    Actor, Money, Payment, PaymentMethod, PaymentStatus, PaymentType, UserType,
};
use crate::error::CoreError;
use crate::integrations::GatewayOrder;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct RechargeStarted {
    pub payment: Payment,
    pub order: GatewayOrder,
}

#[derive(Clone)]
pub struct WalletCore {
    ctx: CoreContext,
}

impl WalletCore {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    pub async fn balance(&self, user_id: i64) -> Result<Money, CoreError> {
        self.ctx.repo.wallet_balance(user_id).await
    }

    /// Open a gateway order for topping up the wallet.
    ///
    /// # Errors
    /// `InvalidInput` when the amount is outside the recharge limits or the
    /// resulting balance would exceed the wallet maximum.
    pub async fn recharge(&self, user_id: i64, amount: Money) -> Result<RechargeStarted, CoreError> {
        let settings = &self.ctx.settings;
        let (min, max) = (
            settings.min_recharge_amount().await?,
            settings.max_recharge_amount().await?,
        );
        if amount < min || amount > max {
            return Err(CoreError::InvalidInput(format!(
                "recharge must be between {} and {}",
                min, max
            )));
        }
        let ceiling = settings.max_wallet_balance().await?;
        let balance = self.ctx.repo.wallet_balance(user_id).await?;
        if balance + amount > ceiling {
            return Err(CoreError::InvalidInput(format!(
                "wallet balance would exceed {}",
                ceiling
            )));
        }

        let paise = amount
            .to_paise()
            .ok_or_else(|| CoreError::InvalidInput(format!("amount {} out of range", amount)))?;
        let reference = new_reference("WLT");
        let order = self
            .ctx
            .gateway
            .create_order(paise, &reference, "wallet_recharge")
            .await?;

        let payment = self
            .ctx
            .repo
            .insert_payment(
                &NewPayment {
                    reference,
                    user_id,
                    amount,
                    payment_type: PaymentType::WalletRecharge,
                    method: PaymentMethod::Razorpay,
                    status: PaymentStatus::Pending,
                    related_entity_type: None,
                    related_entity_id: None,
                    order_id: Some(order.id.clone()),
                    metadata: serde_json::json!({ "source": "recharge" }),
                },
                self.ctx.now(),
            )
            .await?;
        info!(user_id, %amount, order_id = %order.id, "Wallet recharge started");
        Ok(RechargeStarted { payment, order })
    }

    /// Verify the gateway signature and credit the wallet atomically.
    ///
    /// Recharges started before other top-ups landed may take the balance
    /// past the wallet maximum; later recharges are refused until it drops.
    pub async fn verify_recharge(
        &self,
        actor: Actor,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<Payment, CoreError> {
        let payment = self
            .ctx
            .repo
            .get_payment_by_order(order_id)
            .await?
            .filter(|p| p.payment_type == PaymentType::WalletRecharge)
            .ok_or_else(|| CoreError::NotFound(format!("recharge for order {}", order_id)))?;
        if payment.user_id != actor.user_id && !actor.is_admin() {
            return Err(CoreError::Unauthorized(format!(
                "recharge {} belongs to another user",
                payment.reference
            )));
        }
        if payment.status != PaymentStatus::Pending {
            return Err(CoreError::IllegalTransition(format!(
                "recharge {} is {}",
                payment.reference, payment.status
            )));
        }

        if !self.ctx.gateway.verify(order_id, payment_id, signature) {
            warn!(order_id, "Recharge signature mismatch");
            return Err(CoreError::PaymentVerificationFailed(format!(
                "signature mismatch for order {}",
                order_id
            )));
        }

        // The ceiling was checked when the order opened; money the gateway
        // already took is always credited.
        let completed = self
            .ctx
            .repo
            .complete_payment(payment.id, Some(payment_id), Some(signature), self.ctx.now())
            .await?;
        info!(
            user_id = completed.user_id,
            amount = %completed.amount,
            balance_after = ?completed.balance_after,
            "Wallet recharged"
        );
        self.ctx
            .notify(Notification::new(
                completed.user_id,
                NotificationKind::WalletRecharged,
                format!("{} added to your wallet", completed.amount),
            ))
            .await;
        Ok(completed)
    }

    /// Record a pending withdrawal. The balance moves only on completion.
    pub async fn request_withdrawal(&self, actor: Actor, amount: Money) -> Result<Payment, CoreError> {
        if actor.role != UserType::Worker {
            return Err(CoreError::Unauthorized("only workers withdraw earnings".into()));
        }
        if !amount.is_positive() {
            return Err(CoreError::InvalidInput("withdrawal amount must be positive".into()));
        }
        let balance = self.ctx.repo.wallet_balance(actor.user_id).await?;
        if balance < amount {
            return Err(CoreError::InsufficientBalance(format!(
                "balance {} cannot cover {}",
                balance, amount
            )));
        }

        let payment = self
            .ctx
            .repo
            .insert_payment(
                &NewPayment {
                    reference: new_reference("WDR"),
                    user_id: actor.user_id,
                    amount,
                    payment_type: PaymentType::WorkerWithdrawal,
                    method: PaymentMethod::BankTransfer,
                    status: PaymentStatus::Pending,
                    related_entity_type: None,
                    related_entity_id: None,
                    order_id: None,
                    metadata: serde_json::json!({}),
                },
                self.ctx.now(),
            )
            .await?;
        info!(worker_id = actor.user_id, %amount, "Withdrawal requested");
        Ok(payment)
    }

    /// Admin marks a payout done; the wallet is debited atomically.
    pub async fn complete_withdrawal(&self, actor: Actor, payment_id: i64) -> Result<Payment, CoreError> {
        if !actor.is_admin() {
            return Err(CoreError::Unauthorized("only admins complete withdrawals".into()));
        }
        let payment = self
            .ctx
            .repo
            .get_payment(payment_id)
            .await?
            .filter(|p| p.payment_type == PaymentType::WorkerWithdrawal)
            .ok_or_else(|| CoreError::NotFound(format!("withdrawal {}", payment_id)))?;

        let completed = self
            .ctx
            .repo
            .complete_payment(payment.id, None, None, self.ctx.now())
            .await?;
        info!(
            worker_id = completed.user_id,
            amount = %completed.amount,
            "Withdrawal completed"
        );
        self.ctx
            .notify(Notification::new(
                completed.user_id,
                NotificationKind::WithdrawalCompleted,
                format!("{} paid out", completed.amount),
            ))
            .await;
        Ok(completed)
    }
}
