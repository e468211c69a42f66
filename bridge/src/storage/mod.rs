pub mod layout;
pub mod secrets;
pub mod settings;
pub mod site;
