use chrono::Local;
use ramses_frame::decode_frame;
use ramses_gateway::Gateway;
use ramses_schema::Command;
use tracing::info;

use crate::cmd::{parse_address, parse_duration, Query, SendArgs};
use crate::exit::{
    decode_error, dispatch_error, gateway_error, schema_error, CliError, CliResult, SUCCESS,
    TIMEOUT, USAGE,
};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let command = build_command(&args)?;
    let config = args.core.gateway_config()?;

    let gateway =
        Gateway::open(&args.target, &config).map_err(|err| gateway_error("open failed", err))?;
    let handle = gateway
        .enqueue(command)
        .map_err(|err| dispatch_error("send failed", err))?;

    let result = match handle.wait_timeout(timeout) {
        Some(result) => result,
        None => {
            // may already have completed between the timeout and the cancel
            let _ = handle.cancel();
            let _ = gateway.shutdown();
            return Err(CliError::new(
                TIMEOUT,
                format!("no result within {}", args.timeout),
            ));
        }
    };
    let _ = gateway.shutdown();

    match result.map_err(|err| dispatch_error("send failed", err))? {
        Some(reply) => print_message(&reply, format),
        None => info!("command sent"),
    }
    Ok(SUCCESS)
}

fn build_command(args: &SendArgs) -> CliResult<Command> {
    let command = match (&args.raw, args.get, args.setpoint) {
        (Some(raw), _, _) => {
            let frame = decode_frame(raw, Local::now().naive_local())
                .map_err(|err| decode_error("invalid --raw frame", err))?;
            Command::from_frame(frame)
        }
        (None, Some(query), _) => query_command(controller(args)?, query, args.zone),
        (None, None, Some(setpoint)) => {
            Command::set_zone_setpoint(controller(args)?, args.zone, Some(setpoint))
                .map_err(|err| schema_error("invalid setpoint", err))?
        }
        (None, None, None) => {
            return Err(CliError::new(
                USAGE,
                "nothing to send: use --get, --setpoint or --raw",
            ))
        }
    };
    Ok(match args.retries {
        Some(retries) => command.with_retries(retries),
        None => command,
    })
}

fn controller(args: &SendArgs) -> CliResult<ramses_frame::Address> {
    let text = args
        .controller
        .as_deref()
        .ok_or_else(|| CliError::new(USAGE, "--controller is required"))?;
    parse_address(text)
}

fn query_command(ctl: ramses_frame::Address, query: Query, zone: u8) -> Command {
    match query {
        Query::ZoneName => Command::get_zone_name(ctl, zone),
        Query::ZoneConfig => Command::get_zone_config(ctl, zone),
        Query::ZoneTemp => Command::get_zone_temp(ctl, zone),
        Query::ZoneSetpoint => Command::get_zone_setpoint(ctl, zone),
        Query::ZoneMode => Command::get_zone_mode(ctl, zone),
        Query::SystemMode => Command::get_system_mode(ctl),
        Query::DhwTemp => Command::get_dhw_temp(ctl),
        Query::DhwMode => Command::get_dhw_mode(ctl),
        Query::DhwParams => Command::get_dhw_params(ctl),
        Query::OutdoorTemp => Command::get_outdoor_temp(ctl),
        Query::SystemTime => Command::get_system_time(ctl),
        Query::ScheduleVersion => Command::get_schedule_version(ctl),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::CoreArgs;

    fn args() -> SendArgs {
        SendArgs {
            target: "localhost:5000".into(),
            core: CoreArgs::default(),
            controller: Some("01:145038".into()),
            get: None,
            setpoint: None,
            raw: None,
            zone: 0,
            retries: None,
            timeout: "5s".into(),
        }
    }

    #[test]
    fn builds_zone_query() {
        let args = SendArgs {
            get: Some(Query::ZoneTemp),
            zone: 2,
            ..args()
        };
        let command = build_command(&args).expect("query should build");
        assert_eq!(
            command.to_line(),
            "RQ --- 18:000730 01:145038 --:------ 30C9 001 02"
        );
    }

    #[test]
    fn builds_setpoint_with_retries() {
        let args = SendArgs {
            setpoint: Some(21.0),
            zone: 1,
            retries: Some(5),
            ..args()
        };
        let command = build_command(&args).expect("setpoint should build");
        assert_eq!(
            command.to_line(),
            " W --- 18:000730 01:145038 --:------ 2309 003 010834"
        );
        assert_eq!(command.retries(), Some(5));
    }

    #[test]
    fn raw_line_is_taken_verbatim() {
        let line = "RQ --- 18:000730 01:145038 --:------ 0004 002 0100";
        let args = SendArgs {
            controller: None,
            raw: Some(line.into()),
            ..args()
        };
        let command = build_command(&args).expect("raw frame should build");
        assert_eq!(command.to_line(), line);
        assert!(command.expects_reply());
    }

    #[test]
    fn out_of_range_setpoint_is_a_usage_error() {
        let args = SendArgs {
            setpoint: Some(99.0),
            ..args()
        };
        let err = build_command(&args).expect_err("setpoint should be rejected");
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn missing_action_is_a_usage_error() {
        let err = build_command(&args()).expect_err("nothing to send");
        assert_eq!(err.code, USAGE);
    }
}
