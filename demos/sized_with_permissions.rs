use {
    rollfile::{FileWriterBuilder, RotationSize},
    std::io::Write,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("./logs")?;
    let mut logger = FileWriterBuilder::new("./logs/sized.log")
        .max_size(RotationSize::KB(16)) // Rotate at 16KB
        .rotate_postfix("%Y%m%d%H%M%S%.f") // Sub-second postfix so quick rotations get distinct names
        .file_mode(0o640) // Set file permissions to: owner rw, group r, others none
        .build()?;

    // Simulate writing logs that will trigger size-based rotation
    for i in 1..=1000 {
        writeln!(
            logger,
            "Log entry #{}: This is a sample log message that will contribute to file size",
            i
        )?;
    }
    logger.close()?;

    Ok(())
}
