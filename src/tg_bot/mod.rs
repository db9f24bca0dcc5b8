pub mod notifications;

pub use notifications::TelegramNotifier;
