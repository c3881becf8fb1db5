use spyglass_sources::DecoratorRegistry;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::commands::load;
use crate::error::CliResult;
use crate::output::render_validation_summary;

pub(crate) async fn handle_validate(args: &ValidateArgs) -> CliResult<String> {
    let config = load(&args.config, &DecoratorRegistry::default().names()).await?;
    info!(config = %args.config.display(), "configuration validated");
    Ok(render_validation_summary(&config))
}
