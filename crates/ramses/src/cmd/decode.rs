use chrono::Local;
use ramses_frame::FrameConfig;
use ramses_schema::{Payload, Registry};

use crate::cmd::DecodeArgs;
use crate::exit::{decode_error, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = FrameConfig {
        checksum: args.checksum,
    };
    let message = Registry::global()
        .decode_with(&args.line, Local::now().naive_local(), &config)
        .map_err(|err| decode_error("decode failed", err))?;

    print_message(&message, format);

    // the frame itself was fine; flag a payload that does not fit its code
    if matches!(message.payload(), Payload::Malformed { .. }) {
        return Ok(DATA_INVALID);
    }
    Ok(SUCCESS)
}
