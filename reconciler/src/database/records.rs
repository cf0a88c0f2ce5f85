//! Database record types (entities).
//!
//! Statuses are stored as text; the enums here are the only place that
//! knows the spelling.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Statuses
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    PendingPayment,
    Confirmed,
    Canceled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::PendingPayment => "pendiente_pago",
            ReservationStatus::Confirmed => "confirmada",
            ReservationStatus::Canceled => "cancelada",
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pendiente_pago" => Ok(ReservationStatus::PendingPayment),
            "confirmada" => Ok(ReservationStatus::Confirmed),
            "cancelada" => Ok(ReservationStatus::Canceled),
            other => Err(anyhow::anyhow!("Unknown reservation status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MensualidadStatus {
    PendingPayment,
    Paid,
    Canceled,
}

impl MensualidadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MensualidadStatus::PendingPayment => "pendiente_pago",
            MensualidadStatus::Paid => "pagada",
            MensualidadStatus::Canceled => "cancelada",
        }
    }
}

impl FromStr for MensualidadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pendiente_pago" => Ok(MensualidadStatus::PendingPayment),
            "pagada" => Ok(MensualidadStatus::Paid),
            "cancelada" => Ok(MensualidadStatus::Canceled),
            other => Err(anyhow::anyhow!("Unknown mensualidad status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Rejected,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Expired => "expired",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "confirmed" => Ok(PaymentStatus::Confirmed),
            "rejected" => Ok(PaymentStatus::Rejected),
            "expired" => Ok(PaymentStatus::Expired),
            other => Err(anyhow::anyhow!("Unknown payment status '{}'", other)),
        }
    }
}

/// Entities that carry a failure ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Reserva,
    Mensualidad,
}

impl EntityKind {
    pub(crate) fn table(&self) -> &'static str {
        match self {
            EntityKind::Reserva => "reservas",
            EntityKind::Mensualidad => "mensualidades",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Reserva => write!(f, "reserva"),
            EntityKind::Mensualidad => write!(f, "mensualidad"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserva" | "reservas" => Ok(EntityKind::Reserva),
            "mensualidad" | "mensualidades" => Ok(EntityKind::Mensualidad),
            other => Err(anyhow::anyhow!("Unknown entity kind '{}'", other)),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: i64,
    pub codigo: String,
    pub estado: ReservationStatus,
    pub fecha: NaiveDate,
    pub hora_inicio: NaiveTime,
    pub hora_fin: NaiveTime,
    pub usuario_id: i64,
    pub usuario_email: String,
    pub espacio_id: i64,
    pub valor_total: i64,
    pub referencia_pago: Option<String>, // Gateway ticket id
    pub fallos_reporte: i64,
    pub ultimo_error_reporte: Option<String>,
    pub congelada_at: Option<DateTime<Utc>>,
    pub motivo_cancelacion: Option<String>,
    pub cancelacion_notificada_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Insert shape used by the booking flow (and fixtures)
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub codigo: String,
    pub fecha: NaiveDate,
    pub hora_inicio: NaiveTime,
    pub hora_fin: NaiveTime,
    pub usuario_id: i64,
    pub usuario_email: String,
    pub espacio_id: i64,
    pub valor_total: i64,
    pub referencia_pago: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub reserva_id: Option<i64>,
    pub mensualidad_id: Option<i64>,
    pub ticket_id: String,
    pub estado: PaymentStatus,
    pub valor: i64,
    pub fecha_banco: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub reserva_id: Option<i64>,
    pub mensualidad_id: Option<i64>,
    pub ticket_id: String,
    pub valor: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mensualidad {
    pub id: i64,
    pub codigo: String,
    pub usuario_id: i64,
    pub usuario_email: String,
    pub espacio_id: i64,
    pub periodo_inicio: NaiveDate,
    pub periodo_fin: NaiveDate,
    pub valor: i64,
    pub estado: MensualidadStatus,
    pub referencia_pago: Option<String>,
    pub fallos_reporte: i64,
    pub ultimo_error_reporte: Option<String>,
    pub congelada_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewMensualidad {
    pub codigo: String,
    pub usuario_id: i64,
    pub usuario_email: String,
    pub espacio_id: i64,
    pub periodo_inicio: NaiveDate,
    pub periodo_fin: NaiveDate,
    pub valor: i64,
    pub referencia_pago: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Novedad {
    pub id: i64,
    pub espacio_id: i64,
    pub fecha_inicio: NaiveDate,
    pub fecha_fin: NaiveDate,
    pub hora_inicio: Option<NaiveTime>,
    pub hora_fin: Option<NaiveTime>,
    pub descripcion: String,
}

#[derive(Debug, Clone)]
pub struct NewNovedad {
    pub espacio_id: i64,
    pub fecha_inicio: NaiveDate,
    pub fecha_fin: NaiveDate,
    pub hora_inicio: Option<NaiveTime>,
    pub hora_fin: Option<NaiveTime>,
    pub descripcion: String,
}

/// Availability block derived from a novedad for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceBlock {
    pub novedad_id: i64,
    pub espacio_id: i64,
    pub fecha: NaiveDate,
    pub hora_inicio: Option<NaiveTime>,
    pub hora_fin: Option<NaiveTime>,
    pub descripcion: String,
}

// ============================================================================
// Reconciliation views
// ============================================================================

/// A pending payment awaiting bank confirmation, joined with its owner entity
#[derive(Debug, Clone)]
pub struct PendingPayment {
    pub kind: EntityKind,
    pub entity_id: i64,
    pub codigo: String,
    pub usuario_email: String,
    pub payment_id: i64,
    pub ticket_id: String,
    pub valor: i64,
    pub entity_created_at: DateTime<Utc>,
}

/// Candidate of the stale-reservation sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleReservation {
    pub id: i64,
    pub codigo: String,
}

/// Canceled reservation whose ticket the gateway has not acknowledged yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCancellation {
    pub id: i64,
    pub codigo: String,
    pub ticket: String,
}

/// A row written by the booking flow that cannot be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRow {
    pub id: i64,
    pub reason: String,
}

/// Ledger counters after a recorded failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerState {
    pub failures: i64,
    pub frozen: bool,
}

/// Frozen entity as it appears in the failure report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenEntity {
    pub id: i64,
    pub codigo: String,
    pub fallos_reporte: i64,
    pub ultimo_error_reporte: Option<String>,
    pub congelada_at: DateTime<Utc>,
}

// ============================================================================
// Cron bookkeeping
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronRun {
    pub id: String,
    pub comando: String,
    pub estado: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub resumen: Option<String>,
    pub error_message: Option<String>,
}
