use fnv::{FnvHashMap, FnvHashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

/// Access to files by virtual UTF-8 path of the form `<mount point>/<directory>/<name>.<ext>`.
/// Implementations must be usable from the streaming worker threads.
pub trait FileManager: Send + Sync {
    /// Mount point that derived data like the pipeline state cache is written to
    fn local_data_mount_point(&self) -> &str;

    fn is_local_data_writable(&self) -> bool;

    fn does_file_exist(
        &self,
        virtual_filename: &str,
    ) -> bool;

    fn create_directories(
        &self,
        virtual_directory: &str,
    ) -> io::Result<()>;

    fn read_file(
        &self,
        virtual_filename: &str,
    ) -> io::Result<Vec<u8>>;

    fn write_file(
        &self,
        virtual_filename: &str,
        data: &[u8],
    ) -> io::Result<()>;
}

fn split_mount_point(virtual_path: &str) -> (&str, &str) {
    match virtual_path.find('/') {
        Some(slash) => (&virtual_path[..slash], &virtual_path[slash + 1..]),
        None => (virtual_path, ""),
    }
}

fn parent_directory(virtual_filename: &str) -> Option<&str> {
    virtual_filename
        .rfind('/')
        .map(|slash| &virtual_filename[..slash])
}

/// Maps mount points to directories on disk
pub struct NativeFileManager {
    mount_points: FnvHashMap<String, PathBuf>,
    local_data_mount_point: String,
    local_data_writable: bool,
}

impl NativeFileManager {
    pub fn new(
        local_data_mount_point: &str,
        local_data_directory: PathBuf,
        local_data_writable: bool,
    ) -> Self {
        let mut mount_points = FnvHashMap::default();
        mount_points.insert(local_data_mount_point.to_string(), local_data_directory);
        NativeFileManager {
            mount_points,
            local_data_mount_point: local_data_mount_point.to_string(),
            local_data_writable,
        }
    }

    pub fn mount_directory(
        &mut self,
        mount_point: &str,
        directory: PathBuf,
    ) {
        log::info!("Mounting {:?} as {}", directory, mount_point);
        self.mount_points.insert(mount_point.to_string(), directory);
    }

    pub fn map_virtual_to_absolute_filename(
        &self,
        virtual_filename: &str,
    ) -> io::Result<PathBuf> {
        let (mount_point, relative) = split_mount_point(virtual_filename);
        let directory = self.mount_points.get(mount_point).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("Unknown mount point in {}", virtual_filename),
            )
        })?;

        let mut path = directory.clone();
        for component in relative.split('/').filter(|c| !c.is_empty()) {
            if component == ".." {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Virtual path {} leaves its mount point", virtual_filename),
                ));
            }
            path.push(component);
        }
        Ok(path)
    }

    fn check_writable(
        &self,
        virtual_path: &str,
    ) -> io::Result<()> {
        let (mount_point, _) = split_mount_point(virtual_path);
        if mount_point != self.local_data_mount_point || !self.local_data_writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is not writable", virtual_path),
            ));
        }
        Ok(())
    }
}

impl FileManager for NativeFileManager {
    fn local_data_mount_point(&self) -> &str {
        &self.local_data_mount_point
    }

    fn is_local_data_writable(&self) -> bool {
        self.local_data_writable
    }

    fn does_file_exist(
        &self,
        virtual_filename: &str,
    ) -> bool {
        self.map_virtual_to_absolute_filename(virtual_filename)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    fn create_directories(
        &self,
        virtual_directory: &str,
    ) -> io::Result<()> {
        self.check_writable(virtual_directory)?;
        std::fs::create_dir_all(self.map_virtual_to_absolute_filename(virtual_directory)?)
    }

    fn read_file(
        &self,
        virtual_filename: &str,
    ) -> io::Result<Vec<u8>> {
        profiling::scope!("NativeFileManager::read_file");
        std::fs::read(self.map_virtual_to_absolute_filename(virtual_filename)?)
    }

    fn write_file(
        &self,
        virtual_filename: &str,
        data: &[u8],
    ) -> io::Result<()> {
        profiling::scope!("NativeFileManager::write_file");
        self.check_writable(virtual_filename)?;
        std::fs::write(
            self.map_virtual_to_absolute_filename(virtual_filename)?,
            data,
        )
    }
}

#[derive(Default)]
struct MemoryFileManagerInner {
    files: FnvHashMap<String, Vec<u8>>,
    directories: FnvHashSet<String>,
}

/// Keeps all files in memory. Used for tests and for procedurally generated content.
pub struct MemoryFileManager {
    inner: Mutex<MemoryFileManagerInner>,
    local_data_mount_point: String,
    local_data_writable: bool,
}

impl MemoryFileManager {
    pub fn new(
        local_data_mount_point: &str,
        local_data_writable: bool,
    ) -> Self {
        MemoryFileManager {
            inner: Default::default(),
            local_data_mount_point: local_data_mount_point.to_string(),
            local_data_writable,
        }
    }

    /// Put a file in place regardless of write permissions
    pub fn insert_file(
        &self,
        virtual_filename: &str,
        data: Vec<u8>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(directory) = parent_directory(virtual_filename) {
            inner.directories.insert(directory.to_string());
        }
        inner.files.insert(virtual_filename.to_string(), data);
    }

    pub fn remove_file(
        &self,
        virtual_filename: &str,
    ) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().files.remove(virtual_filename)
    }

    pub fn does_directory_exist(
        &self,
        virtual_directory: &str,
    ) -> bool {
        self.inner
            .lock()
            .unwrap()
            .directories
            .contains(virtual_directory)
    }
}

impl FileManager for MemoryFileManager {
    fn local_data_mount_point(&self) -> &str {
        &self.local_data_mount_point
    }

    fn is_local_data_writable(&self) -> bool {
        self.local_data_writable
    }

    fn does_file_exist(
        &self,
        virtual_filename: &str,
    ) -> bool {
        self.inner
            .lock()
            .unwrap()
            .files
            .contains_key(virtual_filename)
    }

    fn create_directories(
        &self,
        virtual_directory: &str,
    ) -> io::Result<()> {
        if !self.local_data_writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "local data is read only",
            ));
        }

        let mut inner = self.inner.lock().unwrap();
        let mut end = 0;
        for component in virtual_directory.split('/') {
            end += component.len();
            inner
                .directories
                .insert(virtual_directory[..end].to_string());
            end += 1;
        }
        Ok(())
    }

    fn read_file(
        &self,
        virtual_filename: &str,
    ) -> io::Result<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .files
            .get(virtual_filename)
            .cloned()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} not found", virtual_filename),
                )
            })
    }

    fn write_file(
        &self,
        virtual_filename: &str,
        data: &[u8],
    ) -> io::Result<()> {
        if !self.local_data_writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "local data is read only",
            ));
        }

        self.insert_file(virtual_filename, data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_file_manager() {
        let file_manager = MemoryFileManager::new("LocalData", true);
        assert!(!file_manager.does_file_exist("LocalData/a/b.bin"));

        file_manager.create_directories("LocalData/a").unwrap();
        assert!(file_manager.does_directory_exist("LocalData"));
        assert!(file_manager.does_directory_exist("LocalData/a"));

        file_manager.write_file("LocalData/a/b.bin", &[1, 2, 3]).unwrap();
        assert!(file_manager.does_file_exist("LocalData/a/b.bin"));
        assert_eq!(
            file_manager.read_file("LocalData/a/b.bin").unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(
            file_manager.read_file("LocalData/c.bin").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_read_only_memory_file_manager() {
        let file_manager = MemoryFileManager::new("LocalData", false);
        assert!(!file_manager.is_local_data_writable());
        assert!(file_manager.write_file("LocalData/x", &[]).is_err());

        // Content can still be provided directly
        file_manager.insert_file("Example/x", vec![4]);
        assert_eq!(file_manager.read_file("Example/x").unwrap(), vec![4]);
    }

    #[test]
    fn test_native_file_manager() {
        let directory = std::env::temp_dir().join(format!(
            "kiln_native_file_manager_test_{}",
            std::process::id()
        ));
        let file_manager = NativeFileManager::new("LocalData", directory.clone(), true);

        file_manager.create_directories("LocalData/cache").unwrap();
        file_manager
            .write_file("LocalData/cache/test.bin", &[5, 6])
            .unwrap();
        assert!(file_manager.does_file_exist("LocalData/cache/test.bin"));
        assert_eq!(
            file_manager.read_file("LocalData/cache/test.bin").unwrap(),
            vec![5, 6]
        );

        assert!(file_manager
            .map_virtual_to_absolute_filename("LocalData/../escape")
            .is_err());
        assert!(!file_manager.does_file_exist("Unknown/test.bin"));
        assert!(file_manager.write_file("Unknown/test.bin", &[]).is_err());

        let _ = std::fs::remove_dir_all(directory);
    }
}
