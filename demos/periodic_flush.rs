use {
    rollfile::FileWriterBuilder,
    std::{thread, time::Duration},
};

/// Writes a few lines with a batch size too large to ever fill, and relies on
/// the background flush to get them to disk.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("./logs")?;
    let writer = FileWriterBuilder::new("./logs/periodic.log")
        .max_batch_size(1_000)
        .flush_interval(Some(Duration::from_millis(200)))
        .error_handler(|err| eprintln!("background flush failed: {err}"))
        .build()?;

    for i in 1..=5 {
        writer.write(format!("heartbeat #{i}\n").as_bytes())?;
        println!("size {} bytes, {} still buffered", writer.size(), writer.buffered());
        thread::sleep(Duration::from_millis(300));
    }

    writer.close()?;
    Ok(())
}
