// lapin::Error -> AppError

use imgpipe_core::error::AppError;
use lapin::protocol::{AMQPErrorKind, AMQPHardError, AMQPSoftError};

/// `wrap` picks the variant for the operation that failed
pub(crate) fn map_lapin_error(err: lapin::Error, wrap: fn(String) -> AppError) -> AppError {
    match &err {
        lapin::Error::ProtocolError(amqp_err) => wrap(format!("Broker refused: {}", amqp_err)),
        lapin::Error::InvalidChannelState(state) => {
            AppError::Channel(format!("Channel not usable: {:?}", state))
        }
        lapin::Error::InvalidConnectionState(state) => {
            AppError::Connection(format!("Connection not usable: {:?}", state))
        }
        lapin::Error::IOError(io) => AppError::Connection(format!("Broker I/O error: {}", io)),
        _ => wrap(err.to_string()),
    }
}

/// Connect failures. Refused logins and vhosts map to `Config`, which is not
/// retried; everything else is a transient `Connection` error.
pub(crate) fn map_connect_error(err: lapin::Error) -> AppError {
    if let lapin::Error::ProtocolError(amqp_err) = &err {
        if is_access_refused(amqp_err.kind()) {
            return AppError::Config(format!("Broker refused access: {}", amqp_err));
        }
    }
    AppError::Connection(format!("Failed to connect to broker: {}", err))
}

fn is_access_refused(kind: &AMQPErrorKind) -> bool {
    matches!(
        kind,
        AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED)
            | AMQPErrorKind::Hard(AMQPHardError::NOTALLOWED)
    )
}
