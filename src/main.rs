fn main() -> anyhow::Result<()> {
    chat_search::cli::run()
}
