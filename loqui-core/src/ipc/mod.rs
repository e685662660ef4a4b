//! Events exposed to an embedding application (UI, IPC bridge).

pub mod events;
