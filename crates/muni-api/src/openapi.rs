//! # OpenAPI Document Assembly
//!
//! Collects every utoipa-documented route into one OpenAPI document,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Municipal Tax Back Office API",
        version = "0.1.0",
        description = "Taxpayer registry, fines, levies, utility services, payments, ledger transactions, personnel, roles and the audit log of a municipal treasury.",
        license(name = "AGPL-3.0-or-later")
    ),
    paths(
        // Taxpayers
        crate::routes::taxpayers::create_taxpayer,
        crate::routes::taxpayers::list_taxpayers,
        crate::routes::taxpayers::get_taxpayer,
        crate::routes::taxpayers::update_taxpayer,
        crate::routes::taxpayers::set_taxpayer_active,
        crate::routes::taxpayers::delete_taxpayer,
        crate::routes::taxpayers::taxpayer_stats,
        // Taxes
        crate::routes::taxes::create_tax,
        crate::routes::taxes::list_taxes,
        crate::routes::taxes::get_tax,
        crate::routes::taxes::update_tax,
        crate::routes::taxes::delete_tax,
        // Declarations
        crate::routes::declarations::create_declaration,
        crate::routes::declarations::list_declarations,
        crate::routes::declarations::get_declaration,
        crate::routes::declarations::update_declaration,
        crate::routes::declarations::delete_declaration,
        crate::routes::declarations::change_declaration_status,
        crate::routes::declarations::pay_declaration,
        // Withholdings
        crate::routes::withholdings::create_withholding,
        crate::routes::withholdings::list_withholdings,
        crate::routes::withholdings::update_withholding,
        crate::routes::withholdings::withholding_stats,
        // Vouchers
        crate::routes::vouchers::create_voucher,
        crate::routes::vouchers::list_vouchers,
        crate::routes::vouchers::update_voucher,
        crate::routes::vouchers::voucher_stats,
        // Fines
        crate::routes::fines::create_fine,
        crate::routes::fines::list_fines,
        crate::routes::fines::get_fine,
        crate::routes::fines::update_fine,
        crate::routes::fines::void_fine,
        crate::routes::fines::pay_fine,
        crate::routes::fines::fine_stats,
        crate::routes::fines::sweep_overdue_fines,
        // Levies
        crate::routes::levies::create_levy,
        crate::routes::levies::list_levies,
        crate::routes::levies::update_levy,
        crate::routes::levies::delete_levy,
        crate::routes::levies::pay_levy,
        crate::routes::levies::change_levy_status,
        crate::routes::levies::levy_stats,
        // Payments
        crate::routes::payments::create_payment,
        crate::routes::payments::list_payments,
        crate::routes::payments::get_payment,
        crate::routes::payments::update_payment,
        crate::routes::payments::process_payment,
        crate::routes::payments::confirm_payment,
        crate::routes::payments::void_payment,
        crate::routes::payments::taxpayer_total,
        // Services
        crate::routes::services::create_service,
        crate::routes::services::list_services,
        crate::routes::services::update_service,
        crate::routes::services::delete_service,
        crate::routes::services::pay_service,
        crate::routes::services::change_service_status,
        crate::routes::services::record_reading,
        crate::routes::services::service_stats,
        // Ledger transactions
        crate::routes::transactions::create_transaction,
        crate::routes::transactions::list_transactions,
        crate::routes::transactions::update_transaction,
        crate::routes::transactions::delete_transaction,
        crate::routes::transactions::void_transaction,
        crate::routes::transactions::transaction_stats,
        crate::routes::transactions::transaction_report,
        // Personnel
        crate::routes::personnel::create_personnel,
        crate::routes::personnel::list_personnel,
        crate::routes::personnel::update_personnel,
        crate::routes::personnel::set_personnel_active,
        crate::routes::personnel::delete_personnel,
        crate::routes::personnel::assign_role,
        crate::routes::personnel::personnel_stats,
        // Roles
        crate::routes::roles::list_permissions,
        crate::routes::roles::create_role,
        crate::routes::roles::update_role,
        crate::routes::roles::set_permissions,
        crate::routes::roles::delete_role,
        // Audit
        crate::routes::audit::list_logs,
        crate::routes::audit::audit_stats,
        crate::routes::audit::verify_chain,
        // Dashboard
        crate::routes::dashboard::dashboard,
    ),
    components(schemas(
        // Records
        crate::state::Taxpayer,
        crate::state::TaxpayerKind,
        crate::state::Tax,
        crate::state::Declaration,
        crate::state::DeclarationStatus,
        crate::state::Withholding,
        crate::state::WithholdingStatus,
        crate::state::Voucher,
        crate::state::VoucherKind,
        crate::state::VoucherStatus,
        crate::state::Personnel,
        crate::state::DocumentType,
        crate::state::Role,
        crate::state::AuditEntry,
        crate::auth::Permission,
        crate::auth::Module,
        crate::auth::Access,
        crate::audit::AuditAction,
        crate::audit::AuditOutcome,
        crate::db::audit::ChainIntegrityResult,
        // Errors
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        // Shared bodies
        crate::routes::VoidRequest,
        crate::routes::PaymentAmount,
        crate::routes::SweepResponse,
        // Module DTOs
        crate::routes::taxpayers::TaxpayerRequest,
        crate::routes::taxpayers::TaxpayerView,
        crate::routes::taxpayers::TaxpayerStats,
        crate::routes::taxes::TaxRequest,
        crate::routes::taxes::TaxStats,
        crate::routes::declarations::DeclarationRequest,
        crate::routes::declarations::DeclarationPaymentRequest,
        crate::routes::withholdings::WithholdingRequest,
        crate::routes::withholdings::WithholdingStats,
        crate::routes::vouchers::VoucherRequest,
        crate::routes::vouchers::VoucherStats,
        crate::routes::fines::FineRequest,
        crate::routes::fines::FineStats,
        crate::routes::fines::InfractionEntry,
        crate::routes::levies::LevyRequest,
        crate::routes::levies::LevyStats,
        crate::routes::payments::PaymentRequest,
        crate::routes::payments::TaxpayerTotal,
        crate::routes::services::ServiceRequest,
        crate::routes::services::ReadingRequest,
        crate::routes::services::ServiceStats,
        crate::routes::services::ServiceTypeEntry,
        crate::routes::services::ServiceStatusEntry,
        crate::routes::transactions::TransactionRequest,
        crate::routes::transactions::TransactionStats,
        crate::routes::transactions::StatusTotal,
        crate::routes::transactions::ReportLine,
        crate::routes::personnel::PersonnelRequest,
        crate::routes::personnel::PersonnelView,
        crate::routes::personnel::PersonnelCreated,
        crate::routes::personnel::Credentials,
        crate::routes::personnel::PersonnelStats,
        crate::routes::roles::RoleRequest,
        crate::routes::roles::RoleView,
        crate::routes::roles::PermissionsRequest,
        crate::routes::audit::AuditStats,
        crate::routes::dashboard::Dashboard,
    )),
    tags(
        (name = "taxpayers", description = "Taxpayer registry"),
        (name = "taxes", description = "Tax catalogue"),
        (name = "declarations", description = "Tax declarations"),
        (name = "withholdings", description = "Withholdings"),
        (name = "vouchers", description = "Fiscal vouchers"),
        (name = "fines", description = "Fines"),
        (name = "levies", description = "Municipal levies"),
        (name = "payments", description = "Payments received"),
        (name = "services", description = "Utility services and meter readings"),
        (name = "transactions", description = "Treasury ledger"),
        (name = "personnel", description = "Employees and their accounts"),
        (name = "roles", description = "Roles and permissions"),
        (name = "audit", description = "Audit log"),
        (name = "dashboard", description = "Dashboard"),
    )
)]
pub struct ApiDoc;

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json — The generated OpenAPI document.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;
    use muni_state::{
        BillingPeriod, InfractionType, LevyType, PaymentMethod, ServiceType, TransactionKind,
    };
    use serde::de::DeserializeOwned;
    use serde_json::Value;

    fn example_as<T: DeserializeOwned>(doc: &Value, schema: &str, field: &str) -> T {
        let example = doc["components"]["schemas"][schema]["properties"][field]["example"].clone();
        serde_json::from_value(example)
            .unwrap_or_else(|e| panic!("{schema}.{field} example is not a valid value: {e}"))
    }

    #[test]
    fn document_lists_module_paths() {
        let doc = ApiDoc::openapi();
        for path in ["/multas", "/tasas/{id}/pago", "/servicios/{id}/lectura", "/auditoria/verificar"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn enum_examples_are_accepted_values() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let _: InfractionType = example_as(&doc, "FineRequest", "infraction");
        let _: LevyType = example_as(&doc, "LevyRequest", "levy_type");
        let _: BillingPeriod = example_as(&doc, "LevyRequest", "billing_period");
        let _: PaymentMethod = example_as(&doc, "PaymentRequest", "method");
        let _: PaymentMethod = example_as(&doc, "DeclarationPaymentRequest", "method");
        let _: ServiceType = example_as(&doc, "ServiceRequest", "service_type");
        let _: TransactionKind = example_as(&doc, "TransactionRequest", "kind");
    }
}
