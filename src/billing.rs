use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::BillingSettings;
use crate::core::vm::VirtualMachine;
use crate::errors::{BillingError, ConfigError, FleetResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingStatus {
    Paid,
    Pending,
    Overdue,
    Suspended,
    Current,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRecord {
    pub user_id: String,
    /// Spend accrued since the period started.
    pub current_charges: f64,
    /// Outstanding balance across all periods. Never negative.
    pub total_charges: f64,
    pub status: BillingStatus,
    pub billing_period: DateTime<Utc>,
}

/// The priced part of a VM. RAM is tracked on the VM but not billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceShape {
    pub cpu_cores: u32,
    pub storage_gb: u32,
}

impl From<&VirtualMachine> for ResourceShape {
    fn from(vm: &VirtualMachine) -> Self {
        Self {
            cpu_cores: vm.cpu_cores,
            storage_gb: vm.storage_gb,
        }
    }
}

/// Per-unit prices the ledger charges. Only constructed from checked values,
/// so a ledger never holds a negative or non-finite rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BillingRates {
    compute_rate: f64, // per core
    storage_rate: f64, // per GB
}

impl Default for BillingRates {
    fn default() -> Self {
        Self {
            compute_rate: 0.10,
            storage_rate: 0.05,
        }
    }
}

impl TryFrom<&BillingSettings> for BillingRates {
    type Error = ConfigError;

    fn try_from(settings: &BillingSettings) -> Result<Self, Self::Error> {
        Self::new(settings.compute_rate, settings.storage_rate)
    }
}

impl BillingRates {
    pub fn new(compute_rate: f64, storage_rate: f64) -> Result<Self, ConfigError> {
        check_rate("billing.compute_rate", compute_rate)?;
        check_rate("billing.storage_rate", storage_rate)?;
        Ok(Self {
            compute_rate,
            storage_rate,
        })
    }

    pub fn compute_rate(&self) -> f64 {
        self.compute_rate
    }

    pub fn storage_rate(&self) -> f64 {
        self.storage_rate
    }

    pub fn cost(&self, shape: &ResourceShape) -> f64 {
        shape.cpu_cores as f64 * self.compute_rate + shape.storage_gb as f64 * self.storage_rate
    }
}

fn check_rate(setting: &'static str, rate: f64) -> Result<(), ConfigError> {
    if !rate.is_finite() || rate < 0.0 {
        return Err(ConfigError::Invalid {
            setting,
            reason: format!("rate must be a non-negative number, got {}", rate),
        });
    }
    Ok(())
}

/// What a closed period cost, captured in the same step that closed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub user_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub period_charges: f64,
    pub outstanding_balance: f64,
}

/// Per-user billing records. Every record has its own lock, so accruals and
/// payments for one user are linearized without blocking other users.
pub struct BillingLedger {
    rates: BillingRates,
    records: RwLock<BTreeMap<String, Arc<Mutex<BillingRecord>>>>,
}

impl BillingLedger {
    pub fn new(rates: BillingRates) -> Self {
        Self {
            rates,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn rates(&self) -> BillingRates {
        self.rates
    }

    /// Opens a record for a new user. Opening twice is a conflict, not a no-op.
    pub async fn open(&self, user_id: &str) -> FleetResult<BillingRecord> {
        if user_id.trim().is_empty() {
            return Err(BillingError::EmptyUserId.into());
        }

        let mut records = self.records.write().await;
        if records.contains_key(user_id) {
            warn!(user_id = %user_id, "Billing record already open");
            return Err(BillingError::AlreadyExists { user_id: user_id.to_string() }.into());
        }

        let record = BillingRecord {
            user_id: user_id.to_string(),
            current_charges: 0.0,
            total_charges: 0.0,
            status: BillingStatus::Current,
            billing_period: Utc::now(),
        };
        records.insert(user_id.to_string(), Arc::new(Mutex::new(record.clone())));

        info!(user_id = %user_id, "Billing record opened");
        Ok(record)
    }

    /// Charges one unit of usage for `shape` and returns the amount added.
    pub async fn accrue(&self, user_id: &str, shape: Option<ResourceShape>) -> FleetResult<f64> {
        let shape = shape.ok_or(BillingError::MissingResourceShape)?;
        let record = self.record(user_id).await?;

        let cost = self.rates.cost(&shape);
        let mut record = record.lock().await;
        record.current_charges += cost;
        record.total_charges += cost;

        info!(
            user_id = %user_id,
            cpu_cores = shape.cpu_cores,
            storage_gb = shape.storage_gb,
            cost,
            total = record.total_charges,
            "Usage accrued"
        );
        Ok(cost)
    }

    /// Starts a new period. Only `current_charges` resets; the outstanding
    /// balance carries over. Use [`BillingLedger::issue_invoice`] to keep the
    /// closed period's spend.
    pub async fn close_period(&self, user_id: &str) -> FleetResult<BillingRecord> {
        let record = self.record(user_id).await?;
        let mut record = record.lock().await;
        record.current_charges = 0.0;
        record.billing_period = Utc::now();

        info!(user_id = %user_id, balance = record.total_charges, "Billing period closed");
        Ok(record.clone())
    }

    pub async fn issue_invoice(&self, user_id: &str) -> FleetResult<Invoice> {
        let record = self.record(user_id).await?;
        let mut record = record.lock().await;

        let now = Utc::now();
        let invoice = Invoice {
            user_id: record.user_id.clone(),
            period_start: record.billing_period,
            period_end: now,
            period_charges: record.current_charges,
            outstanding_balance: record.total_charges,
        };
        record.current_charges = 0.0;
        record.billing_period = now;

        info!(
            user_id = %user_id,
            period_charges = invoice.period_charges,
            balance = invoice.outstanding_balance,
            "Invoice issued"
        );
        Ok(invoice)
    }

    /// Pays down the balance, flooring at zero. Anything paid beyond the
    /// balance is dropped; no credit is kept.
    pub async fn apply_payment(&self, user_id: &str, amount: f64) -> FleetResult<BillingRecord> {
        if !amount.is_finite() || amount < 0.0 {
            warn!(user_id = %user_id, amount, "Rejected payment amount");
            return Err(BillingError::InvalidAmount { amount }.into());
        }

        let record = self.record(user_id).await?;
        let mut record = record.lock().await;
        record.total_charges -= amount;
        if record.total_charges <= 0.0 {
            record.total_charges = 0.0;
            record.status = BillingStatus::Current;
        }

        info!(user_id = %user_id, amount, balance = record.total_charges, "Payment applied");
        Ok(record.clone())
    }

    pub async fn get_record(&self, user_id: &str) -> Option<BillingRecord> {
        let record = self.records.read().await.get(user_id).cloned()?;
        let record = record.lock().await;
        Some(record.clone())
    }

    pub async fn list_records(&self) -> Vec<BillingRecord> {
        let records: Vec<_> = self.records.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(records.len());
        for record in records {
            snapshots.push(record.lock().await.clone());
        }
        snapshots
    }

    async fn record(&self, user_id: &str) -> FleetResult<Arc<Mutex<BillingRecord>>> {
        self.records
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound { user_id: user_id.to_string() }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    const SHAPE: ResourceShape = ResourceShape {
        cpu_cores: 4,
        storage_gb: 200,
    };

    #[test]
    fn test_cost_uses_configured_rates() {
        let rates = BillingRates::new(1.0, 0.5).unwrap();
        assert!((rates.cost(&SHAPE) - 104.0).abs() < 1e-9);
        assert!((BillingRates::default().cost(&SHAPE) - 10.4).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_unusable_rates() {
        for rate in [-1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                BillingRates::new(rate, 0.05),
                Err(ConfigError::Invalid { setting: "billing.compute_rate", .. })
            ));
            assert!(matches!(
                BillingRates::new(0.10, rate),
                Err(ConfigError::Invalid { setting: "billing.storage_rate", .. })
            ));
        }

        let settings = BillingSettings {
            compute_rate: f64::NAN,
            storage_rate: 0.05,
        };
        let err = crate::errors::FleetError::from(BillingRates::try_from(&settings).unwrap_err());
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);

        let free = BillingRates::new(0.0, 0.0).unwrap();
        assert_eq!(free.cost(&SHAPE), 0.0);
    }

    #[tokio::test]
    async fn test_open_twice_conflicts() {
        let ledger = BillingLedger::new(BillingRates::default());
        let record = ledger.open("user1").await.unwrap();
        assert_eq!(record.status, BillingStatus::Current);
        assert_eq!(record.total_charges, 0.0);

        let err = ledger.open("user1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        let err = ledger.open("  ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[tokio::test]
    async fn test_missing_shape_leaves_record_untouched() {
        let ledger = BillingLedger::new(BillingRates::default());
        ledger.open("user1").await.unwrap();

        let err = ledger.accrue("user1", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert_eq!(ledger.get_record("user1").await.unwrap().total_charges, 0.0);
    }

    #[tokio::test]
    async fn test_invoice_captures_period_spend() {
        let ledger = BillingLedger::new(BillingRates::default());
        let opened = ledger.open("user1").await.unwrap();
        ledger.accrue("user1", Some(SHAPE)).await.unwrap();
        ledger.accrue("user1", Some(SHAPE)).await.unwrap();

        let invoice = ledger.issue_invoice("user1").await.unwrap();
        assert!((invoice.period_charges - 20.8).abs() < 1e-9);
        assert!((invoice.outstanding_balance - 20.8).abs() < 1e-9);
        assert_eq!(invoice.period_start, opened.billing_period);

        let record = ledger.get_record("user1").await.unwrap();
        assert_eq!(record.current_charges, 0.0);
        assert_eq!(record.billing_period, invoice.period_end);
        assert!((record.total_charges - 20.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rejects_negative_payment() {
        let ledger = BillingLedger::new(BillingRates::default());
        ledger.open("user1").await.unwrap();
        ledger.accrue("user1", Some(SHAPE)).await.unwrap();

        for amount in [-1.0, f64::NAN, f64::INFINITY] {
            let err = ledger.apply_payment("user1", amount).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        }
        assert!((ledger.get_record("user1").await.unwrap().total_charges - 10.4).abs() < 1e-9);
    }
}
