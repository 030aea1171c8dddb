use std::error::Error;

// Emits VERGEN_BUILD_TIMESTAMP, VERGEN_GIT_SHA and VERGEN_GIT_DIRTY for the
// `--version` banner of the master.
fn main() -> Result<(), Box<dyn Error>> {
    vergen_gitcl::Emitter::default()
        .add_instructions(
            &vergen_gitcl::BuildBuilder::default()
                .build_timestamp(true)
                .build()?,
        )?
        .add_instructions(
            &vergen_gitcl::GitclBuilder::default()
                .sha(true)
                .dirty(true)
                .build()?,
        )?
        .emit()?;
    Ok(())
}
