fn main() -> anyhow::Result<()> {
    hoa_survey::cli::main()
}
