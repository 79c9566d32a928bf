fn main() {
    std::process::exit(gnome_v4l2_lib::run())
}
