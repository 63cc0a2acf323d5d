pub mod agenda;
pub mod chat;
pub mod slots;

pub use agenda::AgendaService;
pub use chat::ChatService;
