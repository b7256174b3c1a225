//! Command-line access to the rootless filesystem operations.
//!
//! Every subcommand maps onto one operation of the `unpriv` library, which
//! makes this handy for poking at extracted image trees that contain
//! directories with modes like `0000`.

use std::{io::copy, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rustix::fs::{FileType, Mode, RawMode};

/// unprivctl
#[derive(Debug, Parser)]
#[clap(name = "unprivctl", version)]
pub struct App {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Writes the contents of a file to stdout
    Cat { path: PathBuf },
    /// Lists the entries of a directory
    Ls { path: PathBuf },
    /// Prints the type, mode and size of a path (without following symlinks)
    Stat { path: PathBuf },
    /// Prints the target of a symlink
    Readlink { path: PathBuf },
    /// Creates an empty file, truncating it if it exists
    Touch { path: PathBuf },
    /// Creates a link at `path` pointing to `target`
    Ln {
        /// Create a symbolic link instead of a hard link
        #[clap(short, long)]
        symbolic: bool,
        target: PathBuf,
        path: PathBuf,
    },
    /// Changes the mode of a path
    Chmod {
        /// the new mode, in octal
        mode: String,
        path: PathBuf,
    },
    /// Removes a path
    Rm {
        /// Remove directories and their contents
        #[clap(short, long)]
        recursive: bool,
        path: PathBuf,
    },
}

fn type_char(file_type: FileType) -> char {
    match file_type {
        FileType::Directory => 'd',
        FileType::Symlink => 'l',
        FileType::CharacterDevice => 'c',
        FileType::BlockDevice => 'b',
        FileType::Fifo => 'p',
        FileType::Socket => 's',
        _ => '-',
    }
}

fn parse_mode(mode: &str) -> Result<Mode> {
    let raw = RawMode::from_str_radix(mode, 8)
        .with_context(|| format!("Invalid octal mode {mode:?}"))?;
    anyhow::ensure!(raw <= 0o7777, "Mode {mode} out of range");
    Ok(Mode::from_raw_mode(raw))
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();

    match args.cmd {
        Command::Cat { path } => {
            let mut file = unpriv::open(&path)?;
            copy(&mut file, &mut std::io::stdout().lock())
                .with_context(|| format!("Reading {}", path.display()))?;
        }
        Command::Ls { path } => {
            let mut entries = unpriv::read_dir(&path)?;
            entries.sort_by(|a, b| a.name().cmp(b.name()));
            for entry in entries {
                println!(
                    "{}{:04o} {}",
                    type_char(entry.file_type()),
                    entry.stat().st_mode as RawMode & 0o7777,
                    entry.name().to_string_lossy()
                );
            }
        }
        Command::Stat { path } => {
            let stat = unpriv::lstat(&path)?;
            let raw_mode = stat.st_mode as RawMode;
            println!(
                "{}{:04o} {}:{} {} {}",
                type_char(FileType::from_raw_mode(raw_mode)),
                raw_mode & 0o7777,
                stat.st_uid,
                stat.st_gid,
                stat.st_size,
                path.display()
            );
        }
        Command::Readlink { path } => {
            println!("{}", unpriv::readlink(&path)?.display());
        }
        Command::Touch { path } => {
            unpriv::create(&path)?;
        }
        Command::Ln {
            symbolic,
            target,
            path,
        } => {
            if symbolic {
                unpriv::symlink(&target, &path)?;
            } else {
                unpriv::link(&target, &path)?;
            }
        }
        Command::Chmod { mode, path } => {
            unpriv::chmod(&path, parse_mode(&mode)?)?;
        }
        Command::Rm { recursive, path } => {
            if recursive {
                unpriv::remove_all(&path)?;
            } else {
                unpriv::remove(&path)?;
            }
        }
    }

    Ok(())
}
