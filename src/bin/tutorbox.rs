use anyhow::Result;

fn main() -> Result<()> {
    tutorbox::cli::run()
}
