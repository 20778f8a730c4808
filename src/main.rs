use clap::Parser;
use log::warn;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tagger::{Config, SaveOutcome, TagField, TaggerError, Workspace};

enum Flow {
    Continue(String),
    Quit,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let (mut workspace, warning) = Workspace::open(&config)?;
    let mut status = match warning {
        Some(e) => {
            warn!("starting with an empty session: {}", e);
            String::from("previous session unreadable")
        }
        None if workspace.state().is_empty() => String::from("ok"),
        None => String::from("session restored"),
    };

    loop {
        // Cooperative auto-save: checked once per prompt
        if let Err(e) = workspace.tick() {
            status = format!("autosave failed: {}", e);
        }

        let saved = workspace
            .last_saved()
            .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
            .unwrap_or_else(|| String::from("never"));
        print!("[saved {}] ({}) > ", saved, status);
        io::stdout().flush()?;

        let mut command = String::new();
        if io::stdin().read_line(&mut command)? == 0 {
            break;
        }

        match execute(&mut workspace, command.trim()) {
            Ok(Flow::Continue(next)) => status = next,
            Ok(Flow::Quit) => break,
            Err(e) => status = e.to_string(),
        }
    }

    match workspace.flush() {
        Ok(SaveOutcome::Saved) => println!("Session saved."),
        Ok(_) => {}
        Err(e) => eprintln!("Error: could not save session: {}", e),
    }
    Ok(())
}

fn execute(ws: &mut Workspace, command: &str) -> Result<Flow, TaggerError> {
    let (verb, rest) = command
        .split_once(char::is_whitespace)
        .map(|(v, r)| (v, r.trim()))
        .unwrap_or((command, ""));

    let status = match verb {
        "" => String::from("ok"),
        "q" | "quit" => return Ok(Flow::Quit),
        "help" => {
            print_help();
            String::from("ok")
        }
        "load" => {
            let bytes = fs::read(rest)?;
            let name = Path::new(rest)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| rest.to_string());
            format!("loaded {} questions", ws.upload(&name, &bytes)?)
        }
        "list" => {
            list_questions(ws);
            let (tagged, total) = ws.state().progress();
            format!("tagged {}/{}", tagged, total)
        }
        "show" => {
            let id = parse_number(rest, "question id")?;
            show_question(ws, id)?;
            String::from("ok")
        }
        "subjects" => {
            print_choices(ws.hierarchy().subjects());
            String::from("ok")
        }
        "topics" => {
            print_choices(ws.hierarchy().topics_for(rest));
            String::from("ok")
        }
        "subtopics" => {
            let (subject, topic) = rest.split_once('/').unwrap_or((rest, ""));
            print_choices(ws.hierarchy().subtopics_for(subject.trim(), topic.trim()));
            String::from("ok")
        }
        "add" => {
            let id = parse_number(rest, "question id")?;
            format!("added mapping {} to question {}", ws.add_mapping(id)?, id)
        }
        "rm" => {
            let mut args = rest.split_whitespace();
            let id = parse_number(args.next().unwrap_or(""), "question id")?;
            let index = parse_number(args.next().unwrap_or(""), "mapping index")?;
            ws.remove_mapping(id, index)?;
            format!("removed mapping {} from question {}", index, id)
        }
        "set" => {
            let mut args = rest.splitn(4, char::is_whitespace);
            let id = parse_number(args.next().unwrap_or(""), "question id")?;
            let index = parse_number(args.next().unwrap_or(""), "mapping index")?;
            let field: TagField = args
                .next()
                .unwrap_or("")
                .parse()
                .map_err(TaggerError::InvalidInput)?;
            let value = args.next().unwrap_or("").trim();
            let mapping = ws.set_field(id, index, field, value)?;
            format!(
                "{} / {} / {}",
                mapping.subject.as_deref().unwrap_or("-"),
                mapping.topic.as_deref().unwrap_or("-"),
                mapping.subtopic.as_deref().unwrap_or("-")
            )
        }
        "export" => {
            let path = if rest.is_empty() { tagger::downloader::EXPORT_FILE_NAME } else { rest };
            if path.to_lowercase().ends_with(".csv") {
                fs::write(path, ws.export_csv()?)?;
            } else {
                fs::write(path, ws.export_xlsx()?)?;
            }
            format!("exported to {}", path)
        }
        "backup" => {
            fs::write(rest, ws.backup_json()?)?;
            format!("backup written to {}", rest)
        }
        "import" => {
            let json = fs::read_to_string(rest)?;
            format!("restored {} questions", ws.import_backup(&json)?)
        }
        "save" => match ws.flush()? {
            SaveOutcome::Saved => String::from("saved"),
            _ => String::from("nothing to save"),
        },
        "clear" => {
            ws.clear()?;
            String::from("session cleared")
        }
        _ => String::from("invalid command"),
    };

    Ok(Flow::Continue(status))
}

fn parse_number(arg: &str, what: &str) -> Result<usize, TaggerError> {
    arg.parse()
        .map_err(|_| TaggerError::InvalidInput(format!("expected a {}, got '{}'", what, arg)))
}

fn print_choices<'a>(choices: impl IntoIterator<Item = &'a str>) {
    for choice in choices {
        println!("  {}", choice);
    }
}

fn list_questions(ws: &Workspace) {
    let state = ws.state();
    let Some(store) = &state.store else {
        println!("No questions loaded.");
        return;
    };
    for (q, mappings) in store.questions.iter().zip(&state.mappings) {
        println!("{:>4}. {} [{} mapping(s)]", q.id, store.text(q), mappings.len());
    }
}

fn show_question(ws: &Workspace, id: usize) -> Result<(), TaggerError> {
    let state = ws.state();
    let store = state.store.as_ref().ok_or(TaggerError::UnknownQuestion(id))?;
    let question = store.get(id)?;

    println!("{}. {}", id, store.text(question));
    println!("   Answer: {}", store.answer(question));
    for (i, m) in state.mappings(id)?.iter().enumerate() {
        println!(
            "   [{}] {} / {} / {}",
            i,
            m.subject.as_deref().unwrap_or("-"),
            m.topic.as_deref().unwrap_or("-"),
            m.subtopic.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  load <file>                       Upload a questions file (.xlsx/.csv)");
    println!("  list                              List questions and mapping counts");
    println!("  show <id>                         Show a question and its mappings");
    println!("  subjects                          List subjects");
    println!("  topics <subject>                  List topics of a subject");
    println!("  subtopics <subject> / <topic>     List subtopics of a topic");
    println!("  add <id>                          Add an empty mapping");
    println!("  rm <id> <index>                   Remove a mapping");
    println!("  set <id> <index> <field> [value]  Set subject|topic|subtopic (blank clears)");
    println!("  export [file]                     Export tagged questions (.xlsx or .csv)");
    println!("  backup <file> / import <file>     Write or restore a JSON backup");
    println!("  save                              Save the session now");
    println!("  clear                             Delete the saved session and start over");
    println!("  q                                 Quit");
}
