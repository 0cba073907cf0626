// ── Plantz Atoms Layer ─────────────────────────────────────────────────────
// The canonical error enum and the collaborator traits the engine is built
// against. Everything here is interface surface: no I/O happens in atoms.

pub mod error;
pub mod traits;
