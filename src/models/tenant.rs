use super::identifiers::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authority environment a tenant issues against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FiscalEnvironment {
    Production,
    Sandbox,
}

impl FiscalEnvironment {
    /// Authority environment code (1 = production, 2 = sandbox)
    pub fn code(&self) -> u8 {
        match self {
            Self::Production => 1,
            Self::Sandbox => 2,
        }
    }
}

impl fmt::Display for FiscalEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Sandbox => write!(f, "sandbox"),
        }
    }
}

/// Opaque reference to the tenant's signing certificate.
///
/// Certificate material lives in an external vault; the orchestrator only
/// carries the reference so workers can hand it to the authority client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateRef(pub String);

impl CertificateRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-tenant issuing configuration.
///
/// The allocation cursors for the tenant's series are persisted alongside
/// this record by the tenant store but are never part of the cached
/// snapshot: only the sequence allocator reads or writes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: TenantId,
    pub legal_name: String,
    /// 14-digit tax id of the issuing company
    pub issuer_tax_id: String,
    /// Two-digit code of the issuer's state
    pub state_code: u8,
    /// Document model code (55 = invoice, 65 = consumer invoice)
    pub document_model: u8,
    pub certificate: CertificateRef,
    pub environment: FiscalEnvironment,
    pub default_series: u32,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl TenantConfig {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        legal_name: impl Into<String>,
        issuer_tax_id: impl Into<String>,
        state_code: u8,
        certificate: CertificateRef,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            legal_name: legal_name.into(),
            issuer_tax_id: issuer_tax_id.into(),
            state_code,
            document_model: 55,
            certificate,
            environment: FiscalEnvironment::Sandbox,
            default_series: 1,
            active: true,
            updated_at: Utc::now(),
        }
    }

    pub fn with_environment(mut self, environment: FiscalEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_default_series(mut self, series: u32) -> Self {
        self.default_series = series;
        self
    }

    pub fn with_document_model(mut self, model: u8) -> Self {
        self.document_model = model;
        self
    }

    pub fn sequence_key(&self, series: u32) -> SequenceKey {
        SequenceKey::new(self.tenant_id.clone(), series)
    }
}

/// Allocation key: one gap-free numbering sequence per (tenant, series)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceKey {
    pub tenant_id: TenantId,
    pub series: u32,
}

impl SequenceKey {
    pub fn new(tenant_id: TenantId, series: u32) -> Self {
        Self { tenant_id, series }
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.series)
    }
}
