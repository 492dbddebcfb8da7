mod pidfile;

pub use pidfile::Pidfile;
