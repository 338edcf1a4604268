// Integration tests for the favorites store

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use scenic_window::player::FavoritesStore;

const SEEDED: &str = "\
# Scenery favorites
# one URL per line, titles above

#Kyoto rain
https://www.youtube.com/watch?v=kyoto

#Swiss Alps
https://www.youtube.com/watch?v=alps
#Reef
https://www.youtube.com/watch?v=reef
";

fn seeded() -> Result<(tempfile::TempDir, FavoritesStore)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("favorites.txt");
    std::fs::write(&path, SEEDED)?;
    Ok((dir, FavoritesStore::new(path)))
}

#[test]
fn test_check_and_add_flip() -> Result<()> {
    let (_dir, store) = seeded()?;
    let url = "https://www.youtube.com/watch?v=new";

    assert!(store.contains("https://www.youtube.com/watch?v=alps")?);
    assert!(!store.contains(url)?);

    assert!(store.add("Fjords", url)?);
    assert!(store.contains(url)?);

    // Adding again is a no-op
    assert!(!store.add("Fjords", url)?);
    assert_eq!(store.urls()?.len(), 4);

    let last = store.list()?.pop().expect("appended entry");
    assert_eq!(last.title.as_deref(), Some("Fjords"));
    assert_eq!(last.url, url);
    Ok(())
}

#[test]
fn test_exact_match_only() -> Result<()> {
    let (_dir, store) = seeded()?;
    assert!(!store.contains("https://www.youtube.com/watch?v=kyot")?);
    assert!(!store.contains("#Kyoto rain")?);
    assert!(!store.contains("")?);
    Ok(())
}

#[test]
fn test_random_is_always_a_listed_url() -> Result<()> {
    let (_dir, store) = seeded()?;
    let urls = store.urls()?;
    assert_eq!(urls.len(), 3);

    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..50 {
        let pick = store.random(&mut rng)?.expect("non-empty list");
        assert!(urls.contains(&pick));
    }
    Ok(())
}

#[test]
fn test_add_creates_missing_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("favorites.txt");
    let store = FavoritesStore::new(&path);

    assert!(store.add("First", "https://example.com/1")?);
    assert_eq!(std::fs::read_to_string(&path)?, "#First\nhttps://example.com/1\n");
    Ok(())
}
