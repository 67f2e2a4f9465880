async fn create_temp_dir() -> anyhow::Result<std::path::PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!(
            "rstow_test{}_{}",
            std::process::id(),
            &idx
        ));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error.into()),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

/// Creates a fresh temporary directory holding empty `local` and `remote` roots.
pub async fn setup_roots() -> anyhow::Result<(std::path::PathBuf, std::path::PathBuf)> {
    let tmp_dir = create_temp_dir().await?;
    let local = tmp_dir.join("local");
    let remote = tmp_dir.join("remote");
    tokio::fs::create_dir(&local).await?;
    tokio::fs::create_dir(&remote).await?;
    Ok((local, remote))
}
