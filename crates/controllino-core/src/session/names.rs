//! Name-to-command lookup
//!
//! Maps the wire names used by Controllino tooling ("GET_INPUT",
//! "SET_OUTPUT", ...) to [`Command`] variants, parsing string arguments.

use crate::protocol::{Command, PinMode};

use super::SessionError;

type Builder = fn(&[&str]) -> Result<Command, String>;

const COMMANDS: &[(&str, Builder)] = &[
    ("READY", ready),
    ("GET_INPUT", get_input),
    ("SET_OUTPUT", set_output),
    ("GET_PIN_MODE", get_pin_mode),
    ("SET_PIN_MODE", set_pin_mode),
    ("LOAD_PIN_MODES", load_pin_modes),
    ("SAVE_PIN_MODES", save_pin_modes),
    ("RESET_PIN_MODES", reset_pin_modes),
    ("TRIGGER_PULSE", trigger_pulse),
    ("LOG_SIGNAL", log_signal),
    ("END_LOG_SIGNAL", end_log_signal),
];

fn ready(args: &[&str]) -> Result<Command, String> {
    no_args(args, Command::Ready)
}

fn get_input(args: &[&str]) -> Result<Command, String> {
    Ok(Command::GetInput { pin: single_pin(args)? })
}

fn set_output(args: &[&str]) -> Result<Command, String> {
    expect_len(args, 2)?;
    Ok(Command::SetOutput {
        pin: pin(args)?,
        level: number(args[1], "level")?,
    })
}

fn get_pin_mode(args: &[&str]) -> Result<Command, String> {
    Ok(Command::GetPinMode { pin: single_pin(args)? })
}

fn set_pin_mode(args: &[&str]) -> Result<Command, String> {
    expect_len(args, 2)?;
    Ok(Command::SetPinMode {
        pin: pin(args)?,
        mode: args[1].parse::<PinMode>()?,
    })
}

fn load_pin_modes(args: &[&str]) -> Result<Command, String> {
    no_args(args, Command::LoadPinModes)
}

fn save_pin_modes(args: &[&str]) -> Result<Command, String> {
    no_args(args, Command::SavePinModes)
}

fn reset_pin_modes(args: &[&str]) -> Result<Command, String> {
    no_args(args, Command::ResetPinModes)
}

fn trigger_pulse(args: &[&str]) -> Result<Command, String> {
    Ok(Command::TriggerPulse { pin: single_pin(args)? })
}

fn log_signal(args: &[&str]) -> Result<Command, String> {
    expect_len(args, 2)?;
    Ok(Command::LogSignal {
        pin: pin(args)?,
        period_ms: number(args[1], "period")?,
    })
}

fn end_log_signal(args: &[&str]) -> Result<Command, String> {
    Ok(Command::EndLogSignal { pin: single_pin(args)? })
}

/// Every name accepted by [`command_from_name`]
pub fn command_names() -> impl Iterator<Item = &'static str> {
    COMMANDS.iter().map(|(name, _)| *name)
}

/// Build a command from its wire name and string arguments.
///
/// Names are matched case-insensitively.
pub fn command_from_name(name: &str, args: &[&str]) -> Result<Command, SessionError> {
    let upper = name.trim().to_ascii_uppercase();
    let (canonical, build) = COMMANDS
        .iter()
        .find(|(n, _)| *n == upper)
        .ok_or_else(|| SessionError::UnknownCommand(name.to_string()))?;

    build(args).map_err(|reason| SessionError::InvalidArguments {
        command: canonical.to_string(),
        reason,
    })
}

fn expect_len(args: &[&str], len: usize) -> Result<(), String> {
    if args.len() == len {
        Ok(())
    } else {
        Err(format!("expected {} arguments, got {}", len, args.len()))
    }
}

fn no_args(args: &[&str], command: Command) -> Result<Command, String> {
    expect_len(args, 0)?;
    Ok(command)
}

fn single_pin(args: &[&str]) -> Result<u8, String> {
    expect_len(args, 1)?;
    pin(args)
}

/// First argument as a pin number
fn pin(args: &[&str]) -> Result<u8, String> {
    match args.first() {
        Some(raw) => number(raw, "pin"),
        None => Err("missing pin argument".to_string()),
    }
}

fn number<N: std::str::FromStr>(raw: &str, field: &str) -> Result<N, String> {
    raw.trim()
        .parse::<N>()
        .map_err(|_| format!("invalid {} '{}'", field, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(
            command_from_name("set_output", &["4", "1"]).unwrap(),
            Command::SetOutput { pin: 4, level: 1 }
        );
    }

    #[test]
    fn test_pin_mode_argument() {
        assert_eq!(
            command_from_name("SET_PIN_MODE", &["30", "input"]).unwrap(),
            Command::SetPinMode { pin: 30, mode: PinMode::Input }
        );
    }

    #[test]
    fn test_unknown_name() {
        assert!(matches!(
            command_from_name("SELF_DESTRUCT", &[]),
            Err(SessionError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_bad_arguments() {
        let err = command_from_name("GET_INPUT", &["A0"]).unwrap_err();
        match err {
            SessionError::InvalidArguments { command, reason } => {
                assert_eq!(command, "GET_INPUT");
                assert!(reason.contains("pin"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(command_from_name("READY", &["1"]).is_err());
        assert!(command_from_name("LOG_SIGNAL", &["1"]).is_err());
    }

    #[test]
    fn test_names_match_commands() {
        for name in command_names() {
            let args: &[&str] = match name {
                "SET_OUTPUT" => &["1", "1"],
                "SET_PIN_MODE" => &["1", "OUTPUT"],
                "LOG_SIGNAL" => &["1", "10"],
                "READY" | "LOAD_PIN_MODES" | "SAVE_PIN_MODES" | "RESET_PIN_MODES" => &[],
                _ => &["1"],
            };
            let command = command_from_name(name, args).unwrap();
            assert_eq!(command.name(), name);
        }
    }
}
