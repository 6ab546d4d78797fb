//! Emoji used across the terminal output, with plain fallbacks.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "[WARN]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static SKIPPED: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");

pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static FILE_NEW: Emoji<'_, '_> = Emoji("📄 ", "+");

pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static BLOCKER: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCK]");
pub static POLICY: Emoji<'_, '_> = Emoji("🛡️  ", "[P]");
