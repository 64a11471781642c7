// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use clap::Parser;
use dcos_upgrade::DcosUpgradeApp;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = DcosUpgradeApp::parse();
    let config = app.load_config()?;
    let log = DcosUpgradeApp::setup_log(&config)?;
    app.exec(&config, &log).await
}
