// This file is part of household.
//
// household is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// household is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

#![deny(clippy::expect_used)]
#![deny(clippy::indexing_slicing)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]

mod command_line;
mod server;

use std::{
    fmt,
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    process::exit,
    sync::mpsc,
    thread,
};

use clap::Parser;
use household::{
    DATA_FILE,
    store::MemoryStore,
    utils::{self, create_data_folder, data_file},
};
use log::{error, info};

use crate::{
    command_line::Args,
    server::{Request, Server},
};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    utils::init_logger(args.debug, args.systemd);

    if args.man {
        return Args::generate_man_page();
    }

    let data_file = if args.skip_the_data_file {
        None
    } else {
        create_data_folder()?;
        Some(data_file(DATA_FILE))
    };

    let store = match &data_file {
        Some(path) if path.exists() => {
            info!("loading {} ...", path.display());
            MemoryStore::load(path)?
        }
        _ => MemoryStore::default(),
    };

    let (tx, rx) = mpsc::channel::<Request>();
    let mut server = Server::new(store, data_file);

    if !args.skip_scheduler {
        server.start_scheduler();
    }

    let tx_signal = tx.clone();
    ctrlc::set_handler(move || {
        if !args.systemd {
            println!();
        }
        handle_error(tx_signal.send(("save".to_string(), None)));
        handle_error(tx_signal.send(("exit".to_string(), None)));
    })?;

    thread::spawn(move || handle_error(server.handle_messages(&rx)));
    Server::save_periodically(tx.clone());

    let address = format!("{}:{}", args.host, args.port);
    let listener = match TcpListener::bind(&address) {
        Ok(listener) => listener,
        Err(error) => {
            error!("TcpListener::bind: {error}");

            let address = format!("0.0.0.0:{}", args.port);
            TcpListener::bind(&address)?
        }
    };

    info!("listening on {} ...", listener.local_addr()?);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(error) => {
                error!("stream: {error}");
                continue;
            }
        };

        let tx = tx.clone();
        thread::spawn(move || {
            if let Err(error) = serve(stream, &tx) {
                error!("connection: {error}");
            }
        });
    }

    Ok(())
}

/// Forwards every line from the client to the server thread and writes back
/// its replies, until the client hangs up.
fn serve(mut stream: TcpStream, tx: &mpsc::Sender<Request>) -> anyhow::Result<()> {
    let peer = stream.peer_addr()?;
    info!("{peer} connected");

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut buf = String::new();
    let (client_tx, client_rx) = mpsc::channel();

    loop {
        buf.clear();
        if reader.read_line(&mut buf)? == 0 {
            break;
        }

        let line = buf.trim();
        if line.chars().any(|ch| ch.is_control() || ch == '\0') {
            stream.write_all(b"? there are control characters in the command\n")?;
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        tx.send((line.to_string(), Some(client_tx.clone())))?;
        let mut reply = client_rx.recv()?;
        reply.push('\n');
        stream.write_all(reply.as_bytes())?;
    }

    info!("{peer} disconnected");
    Ok(())
}

fn handle_error<T, E: fmt::Display>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => {
            error!("{error}");
            exit(1)
        }
    }
}
