//! Shell completion generation.

use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::io;

use crate::Cli;

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    write_completions(shell, &mut io::stdout());
}

fn write_completions(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(shell: Shell) -> String {
        let mut buf = Vec::new();
        write_completions(shell, &mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_bash_completions_cover_subcommands() {
        let out = script(Shell::Bash);
        assert!(out.contains("rmiflash"));
        for sub in ["upgrade", "recover", "info", "image-info"] {
            assert!(out.contains(sub), "missing {sub}");
        }
    }

    #[test]
    fn test_fish_completions_name_binary() {
        assert!(script(Shell::Fish).contains("complete -c rmiflash"));
    }
}
