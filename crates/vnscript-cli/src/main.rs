use std::{env, fs, process::ExitCode};

use vnscript::{ParserContext, Scene, StdoutSink};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let script_path = match args.get(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: vnscript <script.yaml> [--save <out.json>] [--load <in.json>]");
            return ExitCode::FAILURE;
        }
    };
    let save_out = flag_value(&args, "--save");
    let load_in = flag_value(&args, "--load");

    let source = match fs::read_to_string(script_path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("error reading {script_path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    let ctx = match ParserContext::parse(&source) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("parse error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut scene: Scene<StdoutSink> = Scene::new(ctx.script().to_vec());
    scene.subscribe(|event| {
        if event.kind != "step" {
            eprintln!("event: {} {:?}", event.kind, event.data);
        }
    });

    if let Some(path) = load_in {
        let saved = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(err) => {
                eprintln!("error reading save {path}: {err}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(err) = scene.load(&saved) {
            eprintln!("error loading save: {err}");
            return ExitCode::FAILURE;
        }
    }

    loop {
        if let Err(err) = scene.next() {
            eprintln!("runtime error: {err}");
            if let Some((line, column)) = ctx.trace(&err.path) {
                eprintln!("  at {script_path}:{line}:{column}");
            }
            return ExitCode::FAILURE;
        }
        if scene.is_done() {
            break;
        }
        if let Some(menu) = scene.get_menu() {
            let Some(first) = menu.first() else { break };
            eprintln!("menu: picking '{}' (non-interactive demo)", first.label);
            if let Err(err) = scene.pick(&first.id) {
                eprintln!("runtime error: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Some(path) = save_out {
        let saved = scene.save();
        if let Err(err) = fs::write(&path, saved) {
            eprintln!("error writing save {path}: {err}");
            return ExitCode::FAILURE;
        }
        eprintln!("saved to {path}");
    }

    ExitCode::SUCCESS
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).cloned()
}
