fn main() -> anyhow::Result<()> {
    mcp_host_bridge::run()
}
