use {
    rollfile::{Compression, FileWriterBuilder, RotationSize},
    std::{io::Write, time::Instant},
};
/// Rotates every kilobyte with XZ compression, to check nothing is lost while
/// backups are compressed in the background.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("./logs")?;
    let start = Instant::now();
    let mut logger = FileWriterBuilder::new("./logs/rapid.log")
        .max_size(RotationSize::KB(1))
        .rotate_postfix("%Y%m%d%H%M%S%.f")
        .compression(Compression::XZ)
        .error_handler(|err| eprintln!("{err}"))
        .build()?;

    for i in 1..=10_000 {
        writeln!(
            logger,
            "Log entry #{}: This is a sample log message that will contribute to file size",
            i
        )?;
    }
    logger.close()?;
    println!("Done logging: {:?}", start.elapsed());
    Ok(())
}
