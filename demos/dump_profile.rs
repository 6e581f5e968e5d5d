/// Example dumping every attached monitor's profile settings to a file

#[cfg(target_os = "linux")]
fn main() {
    use ddcci::profile::dump_profile;

    for mut monitor in ddcci::Monitor::enumerate() {
        match dump_profile(&mut monitor) {
            Ok(record) => {
                let filename = record.default_filename();
                if let Err(err) = std::fs::write(&filename, record.serialize()) {
                    eprintln!("{monitor}: writing {filename} failed: {err}");
                } else {
                    println!("{monitor} -> {filename}");
                }
            }
            Err(err) => eprintln!("{monitor}: dump failed: {err}"),
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("this example needs the linux i2c transport");
}
