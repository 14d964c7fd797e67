pub mod handle_gateway_callback_command;
pub mod record_invoice_payment_command;

pub use handle_gateway_callback_command::HandleGatewayCallbackCommand;
pub use record_invoice_payment_command::RecordInvoicePaymentCommand;
