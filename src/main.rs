fn main() {
    beamtilt_groups::cli::run();
}
