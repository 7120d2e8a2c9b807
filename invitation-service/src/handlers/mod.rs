pub mod admin_handlers;
pub mod invitation_handlers;
