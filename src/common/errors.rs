use log::error;

/// Log the full context chain of an error and hand it back to the caller.
pub fn handle_error(error: anyhow::Error) -> anyhow::Error {
    let chain: Vec<String> = error.chain().map(|cause| cause.to_string()).collect();
    error!("{}", chain.join("\n  caused by: "));
    error
}
