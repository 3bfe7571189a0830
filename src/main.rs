fn main() {
    tenderflow_lib::run()
}
