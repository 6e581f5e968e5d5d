/// Example setting all monitors to maximum brighness

#[cfg(target_os = "linux")]
fn main() {
    for mut monitor in ddcci::Monitor::enumerate() {
        let _ = monitor.set_luminance(1.0);
    }
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("this example needs the linux i2c transport");
}
