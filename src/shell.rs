//! Tiny helper for spawning a toolchain's environment-priming prelude chained with a vendor
//! command, shared by the compile dispatcher (C5) and archive step (C7).

use cfg_if::cfg_if;
use std::process::Command;

cfg_if! {
    if #[cfg(target_os = "windows")] {
        pub(crate) fn command(line: &str) -> Command {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(line);
            cmd
        }
    } else {
        pub(crate) fn command(line: &str) -> Command {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(line);
            cmd
        }
    }
}
